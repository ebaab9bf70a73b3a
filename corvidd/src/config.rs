//! TOML configuration (§6): one file describes the listener and the
//! static user list the reference `Gateway` seeds itself from at startup.

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImapConfig {
    pub bind_addr: SocketAddr,
    pub tls: Option<TlsConfig>,
    /// Bytes, 0 = unlimited. Per-message cap enforced on APPEND.
    #[serde(default)]
    pub max_message: u64,
    /// Bytes, 0 = unlimited. Per-user fallback when a `[[users]]` entry
    /// doesn't set its own `quota` (§6, `User::quota_bytes`).
    #[serde(default)]
    pub max_storage: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    pub certs: PathBuf,
    pub key: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserEntry {
    pub username: String,
    /// Argon2-encoded; generate with `corvidd tools hash-password`.
    pub password_hash: String,
    #[serde(default)]
    pub quota: u64,
}

pub fn read_config(path: PathBuf) -> Result<Config> {
    let mut file = std::fs::OpenOptions::new().read(true).open(&path)?;
    let mut raw = String::new();
    file.read_to_string(&mut raw)?;
    Ok(toml::from_str(&raw)?)
}
