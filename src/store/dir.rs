use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{FallbackStore, snapshot_key};
use crate::error::FeedError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores snapshots as files named `feed_<id>` in a local directory.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, feed_id: &str) -> PathBuf {
        self.root.join(snapshot_key(feed_id))
    }

    /// A scratch path unique to this process and this write.
    fn tmp_path_for(&self, feed_id: &str) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(
            "{}.{}.{n}.tmp",
            snapshot_key(feed_id),
            std::process::id()
        ))
    }

    fn map_io(feed_id: &str, err: std::io::Error) -> FeedError {
        if err.kind() == ErrorKind::NotFound {
            FeedError::NotFound(feed_id.to_string())
        } else {
            FeedError::Store(format!("{}: {err}", feed_id))
        }
    }
}

#[async_trait]
impl FallbackStore for DirStore {
    async fn get(&self, feed_id: &str) -> Result<Bytes, FeedError> {
        tokio::fs::read(self.path_for(feed_id))
            .await
            .map(Bytes::from)
            .map_err(|e| Self::map_io(feed_id, e))
    }

    async fn put(&self, feed_id: &str, bytes: Bytes) -> Result<(), FeedError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| FeedError::Store(format!("{}: {e}", self.root.display())))?;

        // Write then rename so a concurrent reader never sees a partial file.
        let path = self.path_for(feed_id);
        let tmp = self.tmp_path_for(feed_id);
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::map_io(feed_id, e));
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::map_io(feed_id, e))
    }

    async fn last_modified(&self, feed_id: &str) -> Result<DateTime<Utc>, FeedError> {
        let metadata = tokio::fs::metadata(self.path_for(feed_id))
            .await
            .map_err(|e| Self::map_io(feed_id, e))?;
        let modified = metadata.modified().map_err(|e| Self::map_io(feed_id, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gtfs_rt_aggregator_{name}_{}",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn round_trip_through_files() {
        let root = scratch_dir("dir_round_trip");
        let store = DirStore::new(&root);

        store.put("26", Bytes::from_static(b"\x0a\x00")).await.unwrap();

        assert_eq!(store.get("26").await.unwrap(), Bytes::from_static(b"\x0a\x00"));
        assert!(root.join("feed_26").exists());
        assert!(store.last_modified("26").await.is_ok());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn feed_ids_with_dots_keep_their_own_file() {
        let root = scratch_dir("dir_dotted_ids");
        let store = DirStore::new(&root);

        store.put("1.5", Bytes::from_static(b"dotted")).await.unwrap();
        store.put("1", Bytes::from_static(b"plain")).await.unwrap();

        assert_eq!(store.get("1.5").await.unwrap(), Bytes::from_static(b"dotted"));
        assert_eq!(store.get("1").await.unwrap(), Bytes::from_static(b"plain"));
        assert!(root.join("feed_1.5").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_leave_one_whole_snapshot() {
        let root = scratch_dir("dir_concurrent_puts");
        let _ = std::fs::remove_dir_all(&root);
        let store = std::sync::Arc::new(DirStore::new(&root));

        let payloads: Vec<Bytes> = (0..16u8)
            .map(|i| Bytes::from(vec![i; 64 * 1024]))
            .collect();
        let tasks: Vec<_> = payloads
            .iter()
            .cloned()
            .map(|bytes| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.put("16", bytes).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = store.get("16").await.unwrap();
        assert!(payloads.contains(&stored));

        let leftovers: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let store = DirStore::new(scratch_dir("dir_missing"));
        assert!(matches!(store.get("7").await, Err(FeedError::NotFound(_))));
        assert!(matches!(
            store.last_modified("7").await,
            Err(FeedError::NotFound(_))
        ));
    }
}
