use std::io::{Read, Write};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::{FallbackStore, snapshot_key};
use crate::error::FeedError;

/// Stores snapshots as `feed_<id>` objects in an S3 bucket, optionally
/// gzip-compressed (`feed_<id>.gz`).
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    gzip: bool,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, gzip: bool) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            gzip,
        }
    }

    /// Builds a client from the ambient AWS configuration (env vars,
    /// instance profile, etc.).
    pub async fn from_env(bucket: impl Into<String>, gzip: bool) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, gzip)
    }

    fn key(&self, feed_id: &str) -> String {
        object_key(feed_id, self.gzip)
    }
}

fn object_key(feed_id: &str, gzip: bool) -> String {
    if gzip {
        format!("{}.gz", snapshot_key(feed_id))
    } else {
        snapshot_key(feed_id)
    }
}

fn compress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut decoded)?;
    Ok(decoded)
}

#[async_trait]
impl FallbackStore for S3Store {
    async fn get(&self, feed_id: &str) -> Result<Bytes, FeedError> {
        let key = self.key(feed_id);
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Err(FeedError::NotFound(feed_id.to_string()));
            }
            Err(e) => {
                return Err(FeedError::Store(format!(
                    "S3 GetObject s3://{}/{key} failed: {e}",
                    self.bucket
                )));
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| FeedError::Store(format!("S3 body read for {key} failed: {e}")))?
            .into_bytes();

        if self.gzip {
            decompress(&body)
                .map(Bytes::from)
                .map_err(|e| FeedError::Store(format!("gunzip {key} failed: {e}")))
        } else {
            Ok(body)
        }
    }

    async fn put(&self, feed_id: &str, bytes: Bytes) -> Result<(), FeedError> {
        let key = self.key(feed_id);
        let body = if self.gzip {
            ByteStream::from(
                compress(&bytes).map_err(|e| FeedError::Store(format!("gzip {key} failed: {e}")))?,
            )
        } else {
            ByteStream::from(bytes)
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type("application/x-protobuf")
            .send()
            .await
            .map_err(|e| {
                FeedError::Store(format!("S3 PutObject s3://{}/{key} failed: {e}", self.bucket))
            })?;

        Ok(())
    }

    async fn last_modified(&self, feed_id: &str) -> Result<DateTime<Utc>, FeedError> {
        let key = self.key(feed_id);
        let output = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Err(FeedError::NotFound(feed_id.to_string()));
            }
            Err(e) => {
                return Err(FeedError::Store(format!(
                    "S3 HeadObject s3://{}/{key} failed: {e}",
                    self.bucket
                )));
            }
        };

        output
            .last_modified()
            .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
            .ok_or_else(|| FeedError::Store(format!("{key} has no Last-Modified")))
    }
}
