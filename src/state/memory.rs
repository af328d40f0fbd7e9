use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use super::{PendingAuthState, PendingStateStore, StateStoreError};

struct Entry {
    state: PendingAuthState,
    deadline: Instant,
}

/// In-process pending-state store
///
/// A single mutex guards the map, so removal is the atomic step that
/// makes each token single-use.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.deadline > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PendingStateStore for MemoryStateStore {
    async fn put(&self, state: &PendingAuthState, ttl: Duration) -> Result<(), StateStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        // Abandoned flows are dropped lazily on writes
        entries.retain(|_, entry| entry.deadline > now);

        entries.insert(
            state.state_token.clone(),
            Entry {
                state: state.clone(),
                deadline: now + ttl,
            },
        );
        debug!("Stored pending state ({} live entries)", entries.len());
        Ok(())
    }

    async fn get_and_delete(
        &self,
        state_token: &str,
    ) -> Result<Option<PendingAuthState>, StateStoreError> {
        let entry = self.entries.lock().await.remove(state_token);
        Ok(entry
            .filter(|entry| entry.deadline > Instant::now())
            .map(|entry| entry.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pending(token: &str) -> PendingAuthState {
        PendingAuthState::new(token.to_string(), "/jobs".to_string(), None)
    }

    #[tokio::test]
    async fn test_single_use() {
        let store = MemoryStateStore::new();
        store
            .put(&pending("abc"), Duration::from_secs(60))
            .await
            .unwrap();

        let first = store.get_and_delete("abc").await.unwrap();
        assert_eq!(first.unwrap().return_to, "/jobs");
        assert!(store.get_and_delete("abc").await.unwrap().is_none());
        assert!(store.get_and_delete("abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_is_absent() {
        let store = MemoryStateStore::new();
        assert!(store.get_and_delete("forged").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry() {
        let store = MemoryStateStore::new();
        store
            .put(&pending("short"), Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get_and_delete("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged_on_write() {
        let store = MemoryStateStore::new();
        store
            .put(&pending("old"), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store
            .put(&pending("new"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.entries.lock().await.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_have_one_winner() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .put(&pending("race"), Duration::from_secs(60))
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_and_delete("race").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
