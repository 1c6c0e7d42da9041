use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::FallbackStore;
use crate::error::FeedError;

/// Process-local store. Useful for tests and for running without any
/// durable backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (Bytes, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> FeedError {
        FeedError::Store("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl FallbackStore for MemoryStore {
    async fn get(&self, feed_id: &str) -> Result<Bytes, FeedError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        entries
            .get(feed_id)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| FeedError::NotFound(feed_id.to_string()))
    }

    async fn put(&self, feed_id: &str, bytes: Bytes) -> Result<(), FeedError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(feed_id.to_string(), (bytes, Utc::now()));
        Ok(())
    }

    async fn last_modified(&self, feed_id: &str) -> Result<DateTime<Utc>, FeedError> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        entries
            .get(feed_id)
            .map(|(_, modified)| *modified)
            .ok_or_else(|| FeedError::NotFound(feed_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("2").await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(id) if id == "2"));
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        let before = Utc::now();
        store.put("2", Bytes::from_static(b"abc")).await.unwrap();

        assert_eq!(store.get("2").await.unwrap(), Bytes::from_static(b"abc"));
        assert!(store.last_modified("2").await.unwrap() >= before);
    }
}
