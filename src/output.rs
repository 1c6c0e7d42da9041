//! CSV persistence for per-source refresh reports.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::debug;

use crate::pipeline::{SourceOutcome, SourceReport};

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    timestamp: DateTime<Utc>,
    feed_id: &'a str,
    services: &'a str,
    outcome: SourceOutcome,
    bytes: usize,
    trip_updates: usize,
    vehicles: usize,
    error: Option<&'a str>,
}

/// Appends one row per report to a CSV file, stamped with `timestamp`.
///
/// Creates the file with headers if it does not already exist.
pub fn append_reports(
    path: &str,
    timestamp: DateTime<Utc>,
    reports: &[SourceReport],
) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = reports.len(), "Appending refresh reports");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening {path}"))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for report in reports {
        writer.serialize(ReportRow {
            timestamp,
            feed_id: &report.feed_id,
            services: &report.services,
            outcome: report.outcome,
            bytes: report.bytes,
            trip_updates: report.trip_updates,
            vehicles: report.vehicles,
            error: report.error.as_deref(),
        })?;
    }
    writer.flush()?;

    Ok(())
}
