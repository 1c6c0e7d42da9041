//! Feed source registry.

use serde::{Deserialize, Serialize};

/// One upstream GTFS-RT endpoint and the route letters it publishes.
///
/// `services` is a string of single-character route codes: one feed
/// commonly carries several lines (`"ACEHS"`), and a failure of the feed
/// is reported once per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: String,
    pub services: String,
}

impl FeedSource {
    pub fn new(id: impl Into<String>, services: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            services: services.into(),
        }
    }

    /// Tokens recorded in the failure list when this source is unavailable.
    pub fn failure_tokens(&self) -> impl Iterator<Item = String> + '_ {
        self.services.chars().map(String::from)
    }
}

/// The subway feeds published by the MTA datamine endpoint.
pub fn default_sources() -> Vec<FeedSource> {
    [
        ("1", "123456S"),
        ("26", "ACEHS"),
        ("16", "NQRW"),
        ("21", "BDFM"),
        ("2", "L"),
        ("31", "G"),
        ("36", "JZ"),
        ("51", "7"),
    ]
    .into_iter()
    .map(|(id, services)| FeedSource::new(id, services))
    .collect()
}
