//! Message Handler, Notifier, Session State and Search Compiler (spec §4.2,
//! §4.3, §4.4, §4.7).
//!
//! This crate knows nothing about the wire protocol: every type here is
//! expressed in terms of `corvid_store` data, not IMAP command/response
//! grammar. `corvid-proto` is the only consumer, and it is responsible for
//! translating wire requests into calls here and the results back into
//! response lines.

pub mod handler;
pub mod notify;
pub mod search;
pub mod session;
pub mod uidindex;

pub use handler::MessageHandler;
pub use notify::Notifier;
pub use session::{PendingEvent, SessionState};
