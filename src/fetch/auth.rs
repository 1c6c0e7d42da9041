use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

use super::HttpClient;

/// An [`HttpClient`] wrapper that sends the API key as a request header,
/// e.g. `x-api-key: <key>` for the current MTA endpoints.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> anyhow::Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())?;
        let mut key = HeaderValue::from_str(key)?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            key,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

/// An [`HttpClient`] wrapper that appends the API key as a query parameter,
/// as the legacy datamine endpoint expects (`?key=<key>&feed_id=<id>`).
pub struct UrlParam<C> {
    pub inner: C,
    pub param_name: String,
    pub key: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, param_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            inner,
            param_name: param_name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn api_key_rejects_invalid_header_name() {
        let result = ApiKey::new(BasicClient::new(), "bad header", "secret");
        assert!(result.is_err());
    }

    #[test]
    fn api_key_accepts_valid_header() {
        let result = ApiKey::new(BasicClient::new(), "x-api-key", "secret");
        assert!(result.is_ok());
    }
}
