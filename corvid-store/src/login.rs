//! Auth & Rate Limiter (§4.6): password verification against the stored
//! hash, and a sliding-window limiter keyed by `(username, remote_addr)`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::gateway::ArcGateway;
use crate::ident::UserId;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("argon2 error: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// A session-bound principal returned by a successful login.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub username: String,
}

#[async_trait]
pub trait LoginProvider: Send + Sync {
    /// Returns `None` on any failure — missing user or wrong password are
    /// indistinguishable outcomes, deliberately, so the protocol layer
    /// cannot leak which one occurred (§4.6).
    async fn login(&self, username: &str, password: &str) -> Option<AuthenticatedUser>;
}

/// Verifies against whatever `User::password_hash` the gateway reports.
/// This is the "real" login provider: it has no notion of where the user
/// database lives beyond the `Gateway` trait.
pub struct GatewayLoginProvider {
    gateway: ArcGateway,
}

impl GatewayLoginProvider {
    pub fn new(gateway: ArcGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl LoginProvider for GatewayLoginProvider {
    async fn login(&self, username: &str, password: &str) -> Option<AuthenticatedUser> {
        let user = self.gateway.find_user_by_name(username).await.ok()?;
        let password = password.to_string();
        let hash = user.password_hash.clone();
        let ok = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .ok()?
            .ok()?;
        if !ok {
            return None;
        }
        Some(AuthenticatedUser {
            id: user.id,
            username: user.username,
        })
    }
}

// ---- rate limiter ----

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_CAP: u32 = 100;

struct Window {
    hits: Vec<Instant>,
}

/// Sliding-window counter keyed by `(username, remote_addr)`. Modeled as a
/// trait so a Redis-backed implementation (spec's "Redis-like counter")
/// can stand in without touching the Auth component, per SPEC_FULL §4.6.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Returns `true` if the attempt is allowed (and records it).
    async fn check(&self, username: &str, addr: IpAddr) -> bool;
}

pub struct SlidingWindowLimiter {
    window: Duration,
    cap: u32,
    state: Mutex<HashMap<(String, IpAddr), Window>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, cap: u32) -> Self {
        Self {
            window,
            cap,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_policy() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAP)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, username: &str, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut st = self.state.lock().await;
        let w = st
            .entry((username.to_string(), addr))
            .or_insert_with(|| Window { hits: Vec::new() });
        w.hits.retain(|t| now.duration_since(*t) < self.window);
        if w.hits.len() as u32 >= self.cap {
            return false;
        }
        w.hits.push(now);
        true
    }
}

pub type ArcLoginProvider = Arc<dyn LoginProvider>;
pub type ArcRateLimiter = Arc<dyn RateLimiter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrips() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[tokio::test]
    async fn sliding_window_blocks_after_cap() {
        let rl = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..3 {
            assert!(rl.check("alice", addr).await);
        }
        assert!(!rl.check("alice", addr).await);
        // a different address gets its own budget
        let other: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(rl.check("alice", other).await);
    }
}
