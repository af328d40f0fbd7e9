// Redis pending-state store against a real server; skipped unless REDIS_URL is set
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use talentgate::state::{PendingAuthState, PendingStateStore, RedisStateStore};
use uuid::Uuid;

async fn redis_store() -> Result<Option<RedisStateStore>> {
    let Ok(redis_url) = std::env::var("REDIS_URL") else {
        println!("REDIS_URL not set, skipping Redis state store tests");
        return Ok(None);
    };
    let store =
        RedisStateStore::connect(&redis_url, Duration::from_secs(5), Duration::from_secs(3))
            .await?;
    Ok(Some(store))
}

macro_rules! require_redis {
    ($store:expr) => {
        match $store {
            Some(store) => store,
            None => return Ok(()),
        }
    };
}

fn pending(return_to: &str) -> PendingAuthState {
    PendingAuthState::new(
        Uuid::new_v4().to_string(),
        return_to.to_string(),
        Some(Uuid::new_v4().to_string()),
    )
}

#[tokio::test]
async fn test_get_and_delete_consumes_once() -> Result<()> {
    let store = require_redis!(redis_store().await?);
    let state = pending("/jobs/42");

    store.put(&state, Duration::from_secs(60)).await?;

    let consumed = store.get_and_delete(&state.state_token).await?;
    assert_eq!(consumed.as_ref(), Some(&state));
    assert!(store.get_and_delete(&state.state_token).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unknown_token_is_absent() -> Result<()> {
    let store = require_redis!(redis_store().await?);
    assert!(store.get_and_delete("never-issued").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_expired_state_is_absent() -> Result<()> {
    let store = require_redis!(redis_store().await?);
    let state = pending("/jobs");

    store.put(&state, Duration::from_secs(1)).await?;
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(store.get_and_delete(&state.state_token).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_consumers_see_state_once() -> Result<()> {
    let store = Arc::new(require_redis!(redis_store().await?));
    let state = pending("/jobs");
    store.put(&state, Duration::from_secs(60)).await?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let token = state.state_token.clone();
            tokio::spawn(async move { store.get_and_delete(&token).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await??.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}
