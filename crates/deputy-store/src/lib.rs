//! Checkpoint persistence for relay streams.
//!
//! Defines the `CheckpointStore` trait that all storage backends must implement.
//! Provides a `MemoryStore` for testing and a JSON `FileStore` for deployments.

use async_trait::async_trait;
use deputy_types::{Checkpoint, DeputyError, Result, Window};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable cursor storage, one record per stream id.
///
/// Backend failures surface as `StorageUnavailable`; implementations must
/// never invent a checkpoint to paper over an unreachable backend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    // --- Lifecycle ---
    async fn init(&self) -> Result<()> { Ok(()) }

    /// Current checkpoint, or `None` if the stream has never been seeded.
    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>>;

    /// Return the existing checkpoint unchanged, or insert and return `seed`.
    async fn create_or_get(&self, stream_id: &str, seed: Window) -> Result<Checkpoint>;

    /// Replace `expected` with `next` atomically.
    ///
    /// Fails with `CheckpointConflict` if the stored window is not `expected`.
    async fn advance(&self, stream_id: &str, expected: Window, next: Window) -> Result<Checkpoint>;

    /// Every stored checkpoint, ordered by stream id.
    async fn list(&self) -> Result<Vec<Checkpoint>>;
}

/// Shared compare-and-set rule for `advance`.
pub(crate) fn check_advance(
    stream_id: &str,
    current: Option<&Checkpoint>,
    expected: Window,
    next: Window,
) -> Result<()> {
    let current = current.ok_or_else(|| {
        DeputyError::Other(format!("no checkpoint to advance for stream {}", stream_id))
    })?;

    if current.window() != expected {
        return Err(DeputyError::CheckpointConflict {
            stream_id: stream_id.to_string(),
            expected,
            found: current.window(),
        });
    }

    // Windows must stay contiguous
    if next.from_block != expected.to_block.saturating_add(1) || next.from_block > next.to_block {
        return Err(DeputyError::Other(format!(
            "non-contiguous advance for stream {}: {} -> {}",
            stream_id, expected, next
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_advance_rules() {
        let cp = Checkpoint::new("s", Window::new(100, 111).unwrap());
        let expected = cp.window();

        assert!(check_advance("s", Some(&cp), expected, expected.following(12)).is_ok());

        let stale = Window::new(88, 99).unwrap();
        assert!(matches!(
            check_advance("s", Some(&cp), stale, stale.following(12)),
            Err(DeputyError::CheckpointConflict { .. })
        ));

        let gap = Window::new(113, 124).unwrap();
        assert!(check_advance("s", Some(&cp), expected, gap).is_err());

        assert!(check_advance("s", None, expected, expected.following(12)).is_err());
    }
}
