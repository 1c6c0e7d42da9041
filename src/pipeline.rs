//! One refresh cycle across every feed source.
//!
//! Each source is resolved on its own task: live fetch, falling back to the
//! stored snapshot when the fetch or its decode fails. The cycle waits for
//! all of them, then merges whatever decoded in registry order. Live
//! snapshots are written back to the store in the background; callers that
//! are about to exit drain those writes with [`Pipeline::flush`].

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::FeedError;
use crate::fetch::SnapshotFetcher;
use crate::merge::{TripMap, merge_feeds};
use crate::parser::{DecodedFeed, decode_snapshot};
use crate::sources::FeedSource;
use crate::store::FallbackStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    Live,
    Fallback,
    Unavailable,
}

/// What happened to one source during a refresh or archive round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub feed_id: String,
    pub services: String,
    pub outcome: SourceOutcome,
    pub bytes: usize,
    pub trip_updates: usize,
    pub vehicles: usize,
    pub error: Option<String>,
}

impl SourceReport {
    fn resolved(
        source: &FeedSource,
        outcome: SourceOutcome,
        bytes: usize,
        feed: &DecodedFeed,
    ) -> Self {
        Self {
            feed_id: source.id.clone(),
            services: source.services.clone(),
            outcome,
            bytes,
            trip_updates: feed.trip_updates.len(),
            vehicles: feed.vehicles.len(),
            error: None,
        }
    }

    fn unavailable(source: &FeedSource, err: &FeedError) -> Self {
        Self {
            feed_id: source.id.clone(),
            services: source.services.clone(),
            outcome: SourceOutcome::Unavailable,
            bytes: 0,
            trip_updates: 0,
            vehicles: 0,
            error: Some(err.to_string()),
        }
    }
}

/// Output of [`Pipeline::refresh`]: partial data plus the failure list is a
/// complete result.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutput {
    pub trips: TripMap,
    /// One token per service letter of every unavailable source.
    pub failures: Vec<String>,
    pub reports: Vec<SourceReport>,
}

/// Background store writes that have not been awaited yet.
type PendingWrites = Arc<Mutex<Vec<JoinHandle<()>>>>;

pub struct Pipeline {
    sources: Arc<[FeedSource]>,
    fetcher: Arc<dyn SnapshotFetcher>,
    store: Arc<dyn FallbackStore>,
    delay_threshold_secs: i64,
    pending_writes: PendingWrites,
}

impl Pipeline {
    pub fn new(
        sources: Vec<FeedSource>,
        fetcher: Arc<dyn SnapshotFetcher>,
        store: Arc<dyn FallbackStore>,
        delay_threshold_secs: i64,
    ) -> Self {
        Self {
            sources: sources.into(),
            fetcher,
            store,
            delay_threshold_secs,
            pending_writes: PendingWrites::default(),
        }
    }

    /// Waits for every background write-back started so far.
    pub async fn flush(&self) {
        let pending = std::mem::take(
            &mut *self
                .pending_writes
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if pending.is_empty() {
            return;
        }

        debug!(writes = pending.len(), "Waiting for snapshot write-backs");
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "Snapshot write-back task failed");
            }
        }
    }

    /// Fetches, decodes and merges every source. Never fails as a whole.
    #[tracing::instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn refresh(&self) -> RefreshOutput {
        let tasks: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let span = tracing::info_span!("refresh_source", feed_id = %source.id);
                tokio::spawn(
                    resolve_source(
                        source.clone(),
                        Arc::clone(&self.fetcher),
                        Arc::clone(&self.store),
                        Arc::clone(&self.pending_writes),
                    )
                    .instrument(span),
                )
            })
            .collect();

        let mut feeds = Vec::with_capacity(tasks.len());
        let mut output = RefreshOutput::default();

        // Awaited in registry order so the merge order is deterministic.
        for (source, task) in self.sources.iter().zip(tasks) {
            let result = task.await.unwrap_or_else(|e| {
                Err(FeedError::SourceUnavailable {
                    feed_id: source.id.clone(),
                    reason: format!("task failed: {e}"),
                })
            });

            match result {
                Ok((feed, report)) => {
                    feeds.push(feed);
                    output.reports.push(report);
                }
                Err(e) => {
                    error!(feed_id = %source.id, error = %e, "Feed source unavailable");
                    output.failures.extend(source.failure_tokens());
                    output.reports.push(SourceReport::unavailable(source, &e));
                }
            }
        }

        output.trips = merge_feeds(&feeds, self.delay_threshold_secs);

        info!(
            trips = output.trips.len(),
            failed_services = output.failures.len(),
            "Refresh complete"
        );
        output
    }

    /// Fetches every source and stores the decodable snapshots, without
    /// touching any cache. Undecodable or failed fetches are reported and
    /// leave the previous stored snapshot in place.
    #[tracing::instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn archive(&self) -> Vec<SourceReport> {
        let tasks: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let span = tracing::info_span!("archive_source", feed_id = %source.id);
                let source = source.clone();
                let fetcher = Arc::clone(&self.fetcher);
                let store = Arc::clone(&self.store);
                tokio::spawn(
                    async move {
                        let result = async {
                            let bytes = fetcher.fetch(&source).await?;
                            let feed = decode_snapshot(&source.id, &bytes)?;
                            let len = bytes.len();
                            store.put(&source.id, bytes).await?;
                            Ok::<_, FeedError>((feed, len))
                        }
                        .await;

                        match result {
                            Ok((feed, len)) => {
                                info!(bytes = len, "Snapshot archived");
                                SourceReport::resolved(&source, SourceOutcome::Live, len, &feed)
                            }
                            Err(e) => {
                                warn!(error = %e, "Snapshot not archived");
                                SourceReport::unavailable(&source, &e)
                            }
                        }
                    }
                    .instrument(span),
                )
            })
            .collect();

        let mut reports = Vec::with_capacity(tasks.len());
        for (source, task) in self.sources.iter().zip(tasks) {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => reports.push(SourceReport::unavailable(
                    source,
                    &FeedError::SourceUnavailable {
                        feed_id: source.id.clone(),
                        reason: format!("task failed: {e}"),
                    },
                )),
            }
        }
        reports
    }
}

/// Resolves one source to decoded records: live first, stored snapshot
/// second. Errors here mean the source is unavailable for this cycle.
async fn resolve_source(
    source: FeedSource,
    fetcher: Arc<dyn SnapshotFetcher>,
    store: Arc<dyn FallbackStore>,
    pending_writes: PendingWrites,
) -> Result<(DecodedFeed, SourceReport), FeedError> {
    let live = match fetcher.fetch(&source).await {
        Ok(bytes) => decode_snapshot(&source.id, &bytes).map(|feed| (feed, bytes)),
        Err(e) => Err(e),
    };

    match live {
        Ok((feed, bytes)) => {
            debug!(
                bytes = bytes.len(),
                trip_updates = feed.trip_updates.len(),
                "Live snapshot decoded"
            );
            let report = SourceReport::resolved(&source, SourceOutcome::Live, bytes.len(), &feed);
            write_back(store, &pending_writes, source.id.clone(), bytes);
            Ok((feed, report))
        }
        Err(live_err) => {
            warn!(error = %live_err, "Live fetch failed, trying stored snapshot");
            let (feed, len) = load_fallback(&source, store.as_ref())
                .await
                .map_err(|e| FeedError::SourceUnavailable {
                    feed_id: source.id.clone(),
                    reason: format!("{live_err}; fallback: {e}"),
                })?;
            let report = SourceReport::resolved(&source, SourceOutcome::Fallback, len, &feed);
            Ok((feed, report))
        }
    }
}

async fn load_fallback(
    source: &FeedSource,
    store: &dyn FallbackStore,
) -> Result<(DecodedFeed, usize), FeedError> {
    let bytes = store.get(&source.id).await?;
    match store.last_modified(&source.id).await {
        Ok(updated) => warn!(updated = %updated, "Using stored snapshot"),
        Err(e) => warn!(error = %e, "Using stored snapshot of unknown age"),
    }
    let feed = decode_snapshot(&source.id, &bytes)?;
    Ok((feed, bytes.len()))
}

/// Best-effort background write of a fresh snapshot. Failures are logged
/// and never affect the refresh. The handle is kept until
/// [`Pipeline::flush`] awaits it.
fn write_back(
    store: Arc<dyn FallbackStore>,
    pending_writes: &PendingWrites,
    feed_id: String,
    bytes: Bytes,
) {
    let handle = tokio::spawn(
        async move {
            if let Err(e) = store.put(&feed_id, bytes).await {
                warn!(error = %e, "Failed to store fallback snapshot");
            }
        }
        .in_current_span(),
    );

    let mut pending = pending_writes.lock().unwrap_or_else(PoisonError::into_inner);
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
}
