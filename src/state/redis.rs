use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;

use super::{PendingAuthState, PendingStateStore, StateStoreError};

/// Redis-backed pending-state store
///
/// Values are written with `SET .. EX` so Redis owns expiry, and consumed
/// with `GETDEL`, which is atomic on the server (Redis 6.2+).
#[derive(Clone)]
pub struct RedisStateStore {
    manager: ConnectionManager,
}

impl RedisStateStore {
    /// Connect to Redis
    ///
    /// Both limits also apply to reconnects, so a hung server surfaces as
    /// [`StateStoreError::Unavailable`] instead of stalling the login.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails
    pub async fn connect(
        redis_url: &str,
        connection_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, StateStoreError> {
        info!(
            "Connecting pending-state store to Redis (timeout={}s, response_timeout={}s)",
            connection_timeout.as_secs(),
            response_timeout.as_secs()
        );
        let client = redis::Client::open(redis_url)
            .map_err(|e| StateStoreError::Unavailable(format!("invalid Redis URL: {e}")))?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(connection_timeout)
            .set_response_timeout(response_timeout);
        let manager = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| StateStoreError::Unavailable(format!("Redis connection failed: {e}")))?;
        Ok(Self { manager })
    }
}

/// Rebuild a stored record; the token lives in the key, not the value
fn decode_state(state_token: &str, json: &str) -> Result<PendingAuthState, StateStoreError> {
    let mut state: PendingAuthState =
        serde_json::from_str(json).map_err(|e| StateStoreError::Corrupt(e.to_string()))?;
    state.state_token = state_token.to_string();
    Ok(state)
}

#[async_trait]
impl PendingStateStore for RedisStateStore {
    async fn put(&self, state: &PendingAuthState, ttl: Duration) -> Result<(), StateStoreError> {
        let value = serde_json::to_string(state)
            .map_err(|e| StateStoreError::Corrupt(format!("serialization failed: {e}")))?;
        let key = PendingAuthState::storage_key(&state.state_token);
        let mut conn = self.manager.clone();

        conn.set_ex::<_, _, ()>(&key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| {
                error!("Redis SET operation failed: {e}");
                StateStoreError::Unavailable(e.to_string())
            })
    }

    async fn get_and_delete(
        &self,
        state_token: &str,
    ) -> Result<Option<PendingAuthState>, StateStoreError> {
        let key = PendingAuthState::storage_key(state_token);
        let mut conn = self.manager.clone();

        let value: Option<String> = redis::cmd("GETDEL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis GETDEL operation failed: {e}");
                StateStoreError::Unavailable(e.to_string())
            })?;

        value
            .map(|json| decode_state(state_token, &json))
            .transpose()
    }
}
