//! TTL cache over the refresh pipeline.
//!
//! The current [`CacheEntry`] is an immutable value behind an `Arc`; a
//! refresh builds a new one and swaps the pointer, so readers always see a
//! whole entry. Refreshes happen only inside [`FeedCache::get`] and are
//! single-flight: callers that find the entry stale while another refresh
//! is running wait for it and share its result.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::merge::TripMap;
use crate::pipeline::{Pipeline, SourceReport};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Moves the clock forward, saturating at the latest representable time.
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now = chrono::Duration::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One merged view of every feed, replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: TripMap,
    pub failures: Vec<String>,
    pub as_of: DateTime<Utc>,
    #[serde(skip)]
    pub reports: Vec<SourceReport>,
}

impl CacheEntry {
    /// Whether the entry is still servable at `now`. An `as_of` in the
    /// future (clock stepped back) counts as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.as_of).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }
}

pub struct FeedCache {
    pipeline: Pipeline,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    current: RwLock<Option<Arc<CacheEntry>>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl FeedCache {
    pub fn new(pipeline: Pipeline, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            pipeline,
            clock,
            ttl,
            current: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Waits for snapshot write-backs started by earlier refreshes.
    pub async fn flush(&self) {
        self.pipeline.flush().await;
    }

    /// The current entry, fresh or not, without triggering a refresh.
    pub fn peek(&self) -> Option<Arc<CacheEntry>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_entry(&self) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now();
        self.peek().filter(|entry| entry.is_fresh(now, self.ttl))
    }

    /// Returns the cached entry if fresh, otherwise refreshes synchronously
    /// and returns the new entry.
    pub async fn get(&self) -> Arc<CacheEntry> {
        if let Some(entry) = self.fresh_entry() {
            return entry;
        }

        let _gate = self.refresh_gate.lock().await;

        // Whoever held the gate before us may have just refreshed.
        if let Some(entry) = self.fresh_entry() {
            debug!("Joined in-flight refresh");
            return entry;
        }

        info!("Cache stale, refreshing");
        let output = self.pipeline.refresh().await;
        let entry = Arc::new(CacheEntry {
            data: output.trips,
            failures: output.failures,
            as_of: self.clock.now(),
            reports: output.reports,
        });

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&entry));
        entry
    }
}
