//! In-memory checkpoint store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::*;

/// In-memory checkpoint store (for testing and ephemeral use).
pub struct MemoryStore {
    checkpoints: Mutex<BTreeMap<String, Checkpoint>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<MutexGuard<'_, BTreeMap<String, Checkpoint>>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DeputyError::StorageUnavailable("memory store offline".into()));
        }
        self.checkpoints
            .lock()
            .map_err(|_| DeputyError::StorageUnavailable("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.guard()?.get(stream_id).cloned())
    }

    async fn create_or_get(&self, stream_id: &str, seed: Window) -> Result<Checkpoint> {
        let mut checkpoints = self.guard()?;
        let checkpoint = checkpoints
            .entry(stream_id.to_string())
            .or_insert_with(|| Checkpoint::new(stream_id, seed));
        Ok(checkpoint.clone())
    }

    async fn advance(&self, stream_id: &str, expected: Window, next: Window) -> Result<Checkpoint> {
        let mut checkpoints = self.guard()?;
        check_advance(stream_id, checkpoints.get(stream_id), expected, next)?;
        let checkpoint = Checkpoint::new(stream_id, next);
        checkpoints.insert(stream_id.to_string(), checkpoint.clone());
        Ok(checkpoint)
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.guard()?.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_or_get_is_idempotent() {
        let store = MemoryStore::new();
        let seed = Window::new(976, 987).unwrap();

        let first = store.create_or_get("htlc_events", seed).await.unwrap();
        assert_eq!(first.window(), seed);

        let other_seed = Window::new(1, 12).unwrap();
        let second = store.create_or_get("htlc_events", other_seed).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_advance_compare_and_set() {
        let store = MemoryStore::new();
        let w = Window::new(100, 111).unwrap();
        store.create_or_get("s", w).await.unwrap();

        let next = store.advance("s", w, w.following(12)).await.unwrap();
        assert_eq!(next.window(), Window::new(112, 123).unwrap());

        // Replaying the same advance is a conflict, not a second move
        let err = store.advance("s", w, w.following(12)).await.unwrap_err();
        assert!(matches!(err, DeputyError::CheckpointConflict { .. }));
        assert_eq!(store.load("s").await.unwrap().unwrap().window(), next.window());
    }

    #[tokio::test]
    async fn test_offline_store_never_fabricates() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.load("s").await,
            Err(DeputyError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.create_or_get("s", Window::new(1, 2).unwrap()).await,
            Err(DeputyError::StorageUnavailable(_))
        ));

        store.set_available(true);
        assert!(store.load("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let store = MemoryStore::new();
        let a = Window::new(10, 21).unwrap();
        let b = Window::new(500, 509).unwrap();
        store.create_or_get("a", a).await.unwrap();
        store.create_or_get("b", b).await.unwrap();
        store.advance("a", a, a.following(12)).await.unwrap();

        assert_eq!(store.load("b").await.unwrap().unwrap().window(), b);
        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|c| c.stream_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
