//! Pending authorization state
//!
//! One record per in-flight login, keyed by the anti-CSRF state token and
//! consumed exactly once by the callback. Absence on lookup (expired,
//! already consumed or forged) is an ordinary outcome, not an error.
//!
//! - [`memory`] - single-process store
//! - [`redis`] - shared store for multi-instance deployments

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use self::memory::MemoryStateStore;
pub use self::redis::RedisStateStore;

/// Key prefix for persisted pending state
pub const STATE_KEY_PREFIX: &str = "authstate:";

/// One in-flight login attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthState {
    /// Lookup key; stored as the key, not inside the value
    #[serde(skip)]
    pub state_token: String,
    pub return_to: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl PendingAuthState {
    #[must_use]
    pub fn new(state_token: String, return_to: String, nonce: Option<String>) -> Self {
        Self {
            state_token,
            return_to,
            created_at: Utc::now(),
            nonce,
        }
    }

    /// Store key for this state token
    #[must_use]
    pub fn storage_key(state_token: &str) -> String {
        format!("{STATE_KEY_PREFIX}{state_token}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("pending-state store unavailable: {0}")]
    Unavailable(String),
    #[error("pending-state record is corrupt: {0}")]
    Corrupt(String),
}

/// Short-lived, single-use key/value store for pending login state
#[async_trait]
pub trait PendingStateStore: Send + Sync {
    /// Persist a pending state under its token; the store enforces the TTL
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached
    async fn put(&self, state: &PendingAuthState, ttl: Duration) -> Result<(), StateStoreError>;

    /// Atomically read and remove a pending state
    ///
    /// Of any number of concurrent callers presenting the same token, at most
    /// one receives `Some`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached or the stored value
    /// cannot be decoded
    async fn get_and_delete(
        &self,
        state_token: &str,
    ) -> Result<Option<PendingAuthState>, StateStoreError>;
}
