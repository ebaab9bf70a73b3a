//! Storage Gateway, data model, and Auth & Rate Limiter (spec §3, §4.1, §4.6).
//!
//! This crate owns every type that is persisted, the trait boundary to the
//! (out of scope) document database driver, and the one in-memory
//! implementation of that trait the rest of the workspace builds and tests
//! against.

pub mod error;
pub mod gateway;
pub mod ident;
pub mod login;
pub mod memory;
pub mod model;
