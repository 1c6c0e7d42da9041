//! Live snapshot retrieval.
//!
//! [`HttpClient`] is the transport seam (auth wrappers in [`auth`] decorate
//! it), [`fetch_bytes`] performs one GET, and [`HttpFetcher`] combines them
//! with the [`retry`] policy into a [`SnapshotFetcher`] for the refresh
//! pipeline.

pub mod auth;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Request, Response};

use crate::error::FeedError;
use crate::sources::FeedSource;
use retry::{RetryPolicy, retry_with_backoff};

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// Plain `reqwest` client with connect/request timeouts.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self(client)
    }
}

impl Default for BasicClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.0.execute(req).await
    }
}

/// Issues a single GET for `url` and returns the body of a 2xx response.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    feed_id: &str,
    url: &str,
) -> Result<Bytes, FeedError> {
    let url: reqwest::Url = url
        .parse()
        .map_err(|e| FeedError::fetch(feed_id, format!("invalid URL {url}: {e}"), false))?;
    let req = Request::new(reqwest::Method::GET, url);

    let resp = client
        .execute(req)
        .await
        .map_err(|e| FeedError::from_reqwest(feed_id, e))?;

    if !resp.status().is_success() {
        return Err(FeedError::from_status(feed_id, resp.status()));
    }

    resp.bytes()
        .await
        .map_err(|e| FeedError::from_reqwest(feed_id, e))
}

/// Produces the raw protobuf bytes for one feed source.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Result<Bytes, FeedError>;
}

/// Fetches `<base_url>?feed_id=<id>` over HTTP, retrying transient errors.
pub struct HttpFetcher<C> {
    client: C,
    base_url: String,
    policy: RetryPolicy,
}

impl<C: HttpClient> HttpFetcher<C> {
    pub fn new(client: C, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            policy,
        }
    }

    pub fn feed_url(&self, source: &FeedSource) -> String {
        feed_url(&self.base_url, &source.id)
    }
}

#[async_trait]
impl<C: HttpClient> SnapshotFetcher for HttpFetcher<C> {
    #[tracing::instrument(skip(self, source), fields(feed_id = %source.id))]
    async fn fetch(&self, source: &FeedSource) -> Result<Bytes, FeedError> {
        let url = self.feed_url(source);
        let (client, feed_id, url) = (&self.client, source.id.as_str(), url.as_str());
        retry_with_backoff(self.policy, move |_| fetch_bytes(client, feed_id, url)).await
    }
}

/// Appends the `feed_id` query parameter, preserving any existing query.
pub fn feed_url(base_url: &str, feed_id: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}feed_id={feed_id}")
}
