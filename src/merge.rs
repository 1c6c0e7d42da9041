//! Cross-feed merge with vehicle-position delay correction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::parser::DecodedFeed;

/// Delays at or below this many seconds are treated as noise.
pub const DEFAULT_DELAY_THRESHOLD_SECS: i64 = 90;

/// Predicted arrivals for one trip. `times[i]` belongs to `stops[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSchedule {
    pub trip_id: String,
    pub service: String,
    pub times: Vec<i64>,
    /// Stop ids with their direction suffix, e.g. `L01N`.
    pub stops: Vec<String>,
}

pub type TripMap = HashMap<String, TripSchedule>;

/// `header_timestamp - observed_at` per trip, across all feeds.
///
/// A later observation of the same trip replaces an earlier one.
pub fn delays_by_trip(feeds: &[DecodedFeed]) -> HashMap<String, i64> {
    let mut delays = HashMap::new();
    for feed in feeds {
        let Some(header) = feed.header_timestamp else {
            continue;
        };
        for vehicle in &feed.vehicles {
            if let Some(observed) = vehicle.observed_at {
                delays.insert(vehicle.trip_id.clone(), header - observed);
            }
        }
    }
    delays
}

/// The correction actually applied: zero unless `|delay| > threshold`.
pub fn significant_delay(delay: i64, threshold_secs: i64) -> i64 {
    if delay.abs() > threshold_secs { delay } else { 0 }
}

/// Builds the trip map from every usable feed of a refresh cycle.
///
/// Stops without a time, or whose corrected time does not fit in an `i64`,
/// are dropped from both arrays. Feeds are applied in
/// slice order, so on a trip-id collision the later feed wins.
pub fn merge_feeds(feeds: &[DecodedFeed], threshold_secs: i64) -> TripMap {
    let delays = delays_by_trip(feeds);
    let mut trips = TripMap::new();
    let mut owner: HashMap<&str, &str> = HashMap::new();

    for feed in feeds {
        for update in &feed.trip_updates {
            let delay = delays
                .get(&update.trip_id)
                .map_or(0, |d| significant_delay(*d, threshold_secs));

            let (times, stops): (Vec<i64>, Vec<String>) = update
                .stops
                .iter()
                .filter_map(|stop| Some((stop.time?.checked_add(delay)?, stop.raw_stop_id())))
                .unzip();

            if let Some(previous) = owner.insert(&update.trip_id, &feed.feed_id) {
                if previous != feed.feed_id {
                    warn!(
                        trip_id = %update.trip_id,
                        previous_feed = previous,
                        feed_id = %feed.feed_id,
                        "Trip id reported by more than one feed, keeping the later one"
                    );
                }
            }

            trips.insert(
                update.trip_id.clone(),
                TripSchedule {
                    trip_id: update.trip_id.clone(),
                    service: update.service.clone(),
                    times,
                    stops,
                },
            );
        }
    }

    trips
}
