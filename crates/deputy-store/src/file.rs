//! JSON-file checkpoint store.
//!
//! One document `{streamId, fromBlock, toBlock}` per stream. Updates are
//! written to a temporary file in the same directory and renamed over the
//! target, so a crash leaves either the old or the new document. The
//! directory is synced after the rename so the new entry itself is durable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::*;

pub struct FileStore {
    dir: PathBuf,
    // serializes read-compare-write sequences
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, stream_id: &str) -> PathBuf {
        let file_name: String = stream_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }

    async fn read(&self, stream_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(stream_id);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path, e)),
        };

        let checkpoint = decode(&path, &raw)?;
        if checkpoint.stream_id != stream_id {
            return Err(DeputyError::StorageUnavailable(format!(
                "checkpoint {} belongs to stream {}, not {}",
                path.display(),
                checkpoint.stream_id,
                stream_id
            )));
        }
        Ok(Some(checkpoint))
    }

    async fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.stream_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| DeputyError::Other(format!("failed to encode checkpoint: {}", e)))?;

        let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| unavailable(&tmp, e))?;
        file.write_all(&body).await.map_err(|e| unavailable(&tmp, e))?;
        file.sync_all().await.map_err(|e| unavailable(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(|e| unavailable(&path, e))?;
        self.sync_dir().await?;
        debug!(
            stream_id = %checkpoint.stream_id,
            from = checkpoint.from_block,
            to = checkpoint.to_block,
            "checkpoint written"
        );
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<()> {
        let dir = tokio::fs::File::open(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;
        dir.sync_all().await.map_err(|e| unavailable(&self.dir, e))
    }

    // directories cannot be opened for syncing here
    #[cfg(not(unix))]
    async fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}

/// Parse a stored document, rejecting one whose window is inverted.
fn decode(path: &Path, raw: &[u8]) -> Result<Checkpoint> {
    let checkpoint: Checkpoint = serde_json::from_slice(raw).map_err(|e| {
        DeputyError::StorageUnavailable(format!("corrupt checkpoint {}: {}", path.display(), e))
    })?;
    Window::new(checkpoint.from_block, checkpoint.to_block).map_err(|e| {
        DeputyError::StorageUnavailable(format!("invalid window in {}: {}", path.display(), e))
    })?;
    Ok(checkpoint)
}

fn unavailable(path: &Path, e: std::io::Error) -> DeputyError {
    DeputyError::StorageUnavailable(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))
    }

    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>> {
        self.read(stream_id).await
    }

    async fn create_or_get(&self, stream_id: &str, seed: Window) -> Result<Checkpoint> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read(stream_id).await? {
            return Ok(existing);
        }
        let checkpoint = Checkpoint::new(stream_id, seed);
        self.write(&checkpoint).await?;
        Ok(checkpoint)
    }

    async fn advance(&self, stream_id: &str, expected: Window, next: Window) -> Result<Checkpoint> {
        let _guard = self.write_lock.lock().await;
        let current = self.read(stream_id).await?;
        check_advance(stream_id, current.as_ref(), expected, next)?;
        let checkpoint = Checkpoint::new(stream_id, next);
        self.write(&checkpoint).await?;
        Ok(checkpoint)
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&self.dir, e)),
        };

        let mut checkpoints = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await.map_err(|e| unavailable(&path, e))?;
            checkpoints.push(decode(&path, &raw)?);
        }
        checkpoints.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let seed = Window::new(976, 987).unwrap();

        {
            let store = FileStore::new(dir.path());
            store.init().await.unwrap();
            store.create_or_get("htlc_events", seed).await.unwrap();
            store.advance("htlc_events", seed, seed.following(12)).await.unwrap();
        }

        let reopened = FileStore::new(dir.path());
        let cp = reopened.load("htlc_events").await.unwrap().unwrap();
        assert_eq!(cp.window(), Window::new(988, 999).unwrap());

        // Seeding again must not reset the persisted cursor
        let again = reopened.create_or_get("htlc_events", seed).await.unwrap();
        assert_eq!(again.window(), cp.window());
    }

    #[tokio::test]
    async fn test_document_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.init().await.unwrap();
        store.create_or_get("swap/erc20", Window::new(1, 12).unwrap()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("swap_erc20.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["streamId"], "swap/erc20");
        assert_eq!(doc["fromBlock"], 1);
        assert_eq!(doc["toBlock"], 12);
        assert!(!dir.path().join("swap_erc20.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_stale_advance_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.init().await.unwrap();
        let w = Window::new(100, 111).unwrap();
        store.create_or_get("s", w).await.unwrap();
        store.advance("s", w, w.following(12)).await.unwrap();

        let err = store.advance("s", w, w.following(12)).await.unwrap_err();
        assert!(matches!(err, DeputyError::CheckpointConflict { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.json"), b"{not json").unwrap();

        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load("s").await,
            Err(DeputyError::StorageUnavailable(_))
        ));
        assert!(matches!(
            store.create_or_get("s", Window::new(1, 2).unwrap()).await,
            Err(DeputyError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_inverted_window_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("s.json"),
            br#"{"streamId":"s","fromBlock":20,"toBlock":10}"#,
        )
        .unwrap();

        let store = FileStore::new(dir.path());
        assert!(matches!(store.load("s").await, Err(DeputyError::StorageUnavailable(_))));
        assert!(matches!(store.list().await, Err(DeputyError::StorageUnavailable(_))));
        // a relay cycle must not seed over it either
        assert!(matches!(
            store.create_or_get("s", Window::new(1, 2).unwrap()).await,
            Err(DeputyError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_advance_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        store.init().await.unwrap();
        let w = Window::new(100, 111).unwrap();
        store.create_or_get("s", w).await.unwrap();
        store.advance("s", w, w.following(12)).await.unwrap();
        store.advance("s", w.following(12), w.following(12).following(12)).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["s.json"]);

        let reopened = FileStore::new(store.dir());
        let cp = reopened.load("s").await.unwrap().unwrap();
        assert_eq!(cp.window(), Window::new(124, 135).unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.init().await.unwrap();
        store.create_or_get("b", Window::new(5, 6).unwrap()).await.unwrap();
        store.create_or_get("a", Window::new(1, 2).unwrap()).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|c| c.stream_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
