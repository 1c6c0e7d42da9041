use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::fetch::retry::RetryPolicy;
use crate::merge::DEFAULT_DELAY_THRESHOLD_SECS;

pub const DEFAULT_FEED_URL: &str = "http://datamine.mta.info/mta_esi.php";
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Engine tuning. Every field has a default and an environment override.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL; `feed_id=<id>` is appended per source (`FEED_BASE_URL`).
    pub feed_url: String,
    /// How long a merged result is served before the next `get()` refreshes
    /// it (`CACHE_TTL_SECS`).
    pub ttl: Duration,
    /// Vehicle delays at or below this magnitude are ignored
    /// (`DELAY_THRESHOLD_SECS`).
    pub delay_threshold_secs: i64,
    /// `FETCH_MAX_ATTEMPTS`, `FETCH_BACKOFF_MS`
    pub retry: RetryPolicy,
    /// `GTFS_REALTIME_API_KEY`
    pub api_key: Option<String>,
    /// When set, the key is sent in this header instead of as the `key`
    /// query parameter (`GTFS_REALTIME_API_KEY_HEADER`).
    pub api_key_header: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            ttl: DEFAULT_TTL,
            delay_threshold_secs: DEFAULT_DELAY_THRESHOLD_SECS,
            retry: RetryPolicy::default(),
            api_key: None,
            api_key_header: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup, falling back to
    /// defaults for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let parse = |name: &str| -> Result<Option<u64>> { parse_var(name, lookup(name)) };

        Ok(Self {
            feed_url: lookup("FEED_BASE_URL").unwrap_or(defaults.feed_url),
            ttl: parse("CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            delay_threshold_secs: parse_var("DELAY_THRESHOLD_SECS", lookup("DELAY_THRESHOLD_SECS"))?
                .unwrap_or(defaults.delay_threshold_secs),
            retry: RetryPolicy {
                max_attempts: parse_var("FETCH_MAX_ATTEMPTS", lookup("FETCH_MAX_ATTEMPTS"))?
                    .unwrap_or(defaults.retry.max_attempts),
                backoff: parse("FETCH_BACKOFF_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.backoff),
            },
            api_key: lookup("GTFS_REALTIME_API_KEY").filter(|k| !k.is_empty()),
            api_key_header: lookup("GTFS_REALTIME_API_KEY_HEADER").filter(|h| !h.is_empty()),
        })
    }
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .with_context(|| format!("{name} has invalid value '{v}'"))
        })
        .transpose()
}
