//! Durable fallback snapshots.
//!
//! A [`FallbackStore`] keeps the last known-good raw bytes per feed. The
//! refresh pipeline writes every successful live fetch back to it and reads
//! from it only when a live fetch fails.

mod dir;
mod memory;
mod s3;

pub use dir::DirStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::FeedError;

#[async_trait]
pub trait FallbackStore: Send + Sync {
    /// Returns [`FeedError::NotFound`] when nothing was stored for `feed_id`.
    async fn get(&self, feed_id: &str) -> Result<Bytes, FeedError>;

    async fn put(&self, feed_id: &str, bytes: Bytes) -> Result<(), FeedError>;

    async fn last_modified(&self, feed_id: &str) -> Result<DateTime<Utc>, FeedError>;
}

/// Object name for a feed's snapshot.
pub fn snapshot_key(feed_id: &str) -> String {
    format!("feed_{feed_id}")
}
