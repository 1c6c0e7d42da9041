//! Read-only projections of a [`CacheEntry`] for the HTTP layer.
//!
//! Timestamps are epoch seconds, as published by the feeds.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheEntry;
use crate::merge::TripMap;
use crate::parser::split_direction;

/// Arrivals per direction are capped at this many, soonest first.
pub const MAX_ARRIVALS_PER_SERVICE: usize = 4;

pub type TimesByService = BTreeMap<String, Vec<i64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopArrivals {
    #[serde(rename = "stopId")]
    pub stop_id: String,
    #[serde(rename = "N")]
    pub north: TimesByService,
    #[serde(rename = "S")]
    pub south: TimesByService,
}

/// Groups every trip's stop times by canonical stop id, then direction,
/// then service. Duplicate times are dropped and each list keeps the
/// [`MAX_ARRIVALS_PER_SERVICE`] soonest. Directions other than `N`/`S` are
/// ignored.
pub fn arrivals_by_stop(trips: &TripMap) -> BTreeMap<String, StopArrivals> {
    // stop -> direction -> service -> times (sorted, deduplicated by the set)
    let mut grouped: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, BTreeSet<i64>>>> =
        BTreeMap::new();

    for trip in trips.values() {
        for (raw, time) in trip.stops.iter().zip(&trip.times) {
            let (stop_id, direction) = split_direction(raw);
            grouped
                .entry(stop_id)
                .or_default()
                .entry(direction)
                .or_default()
                .entry(trip.service.as_str())
                .or_default()
                .insert(*time);
        }
    }

    grouped
        .into_iter()
        .map(|(stop_id, by_direction)| {
            let mut arrivals = StopArrivals {
                stop_id: stop_id.to_string(),
                ..Default::default()
            };
            for (direction, by_service) in by_direction {
                let target = match direction {
                    "N" => &mut arrivals.north,
                    "S" => &mut arrivals.south,
                    _ => continue,
                };
                for (service, times) in by_service {
                    target.insert(
                        service.to_string(),
                        times.into_iter().take(MAX_ARRIVALS_PER_SERVICE).collect(),
                    );
                }
            }
            (stop_id.to_string(), arrivals)
        })
        .collect()
}

/// Body of the arrivals endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalsResponse {
    pub data: BTreeMap<String, StopArrivals>,
    pub error_message: String,
}

impl ArrivalsResponse {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            data: arrivals_by_stop(&entry.data),
            error_message: failure_message(&entry.failures),
        }
    }
}

/// `"Failed to load data for A, C, E"`, or empty when nothing failed.
pub fn failure_message(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!("Failed to load data for {}", failures.join(", "))
    }
}

/// `Cache-Control` value matching the cache TTL.
pub fn cache_control(ttl: Duration) -> String {
    let secs = ttl.as_secs();
    format!("public, max-age={secs}, s-maxage={secs}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStop {
    pub time: i64,
    /// Canonical stop id, without the direction suffix.
    pub stop_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripView {
    pub trip_id: String,
    pub stops: Vec<TripStop>,
}

/// Trips of `service` whose id carries the `..<direction>` marker (e.g.
/// `036000_L..N`), ordered by trip id. Only stops accepted by `is_known`
/// are kept.
pub fn trips_in_direction(
    trips: &TripMap,
    service: &str,
    direction: &str,
    is_known: impl Fn(&str) -> bool,
) -> Vec<TripView> {
    let marker = format!("..{direction}");
    let mut views: Vec<TripView> = trips
        .values()
        .filter(|trip| trip.service == service && trip.trip_id.contains(&marker))
        .map(|trip| TripView {
            trip_id: trip.trip_id.clone(),
            stops: trip
                .stops
                .iter()
                .zip(&trip.times)
                .map(|(raw, time)| (split_direction(raw).0, *time))
                .filter(|(stop_id, _)| is_known(*stop_id))
                .map(|(stop_id, time)| TripStop {
                    time,
                    stop_id: stop_id.to_string(),
                })
                .collect(),
        })
        .collect();
    views.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::TripSchedule;

    fn schedule(trip_id: &str, service: &str, stops: &[(&str, i64)]) -> TripSchedule {
        TripSchedule {
            trip_id: trip_id.to_string(),
            service: service.to_string(),
            times: stops.iter().map(|(_, t)| *t).collect(),
            stops: stops.iter().map(|(s, _)| s.to_string()).collect(),
        }
    }

    fn trip_map(schedules: Vec<TripSchedule>) -> TripMap {
        schedules
            .into_iter()
            .map(|s| (s.trip_id.clone(), s))
            .collect()
    }

    #[test]
    fn arrivals_are_sorted_deduplicated_and_capped() {
        let trips = trip_map(vec![
            schedule("a..N", "L", &[("L01N", 500)]),
            schedule("b..N", "L", &[("L01N", 100)]),
            schedule("c..N", "L", &[("L01N", 300)]),
            schedule("d..N", "L", &[("L01N", 100)]),
            schedule("e..N", "L", &[("L01N", 400)]),
            schedule("f..N", "L", &[("L01N", 200)]),
        ]);

        let by_stop = arrivals_by_stop(&trips);

        assert_eq!(by_stop["L01"].north["L"], vec![100, 200, 300, 400]);
        assert!(by_stop["L01"].south.is_empty());
    }

    #[test]
    fn arrivals_split_by_direction_and_service() {
        let trips = trip_map(vec![
            schedule("1..N", "A", &[("A02N", 10), ("A03N", 20)]),
            schedule("2..S", "C", &[("A03S", 30)]),
            schedule("3..S", "A", &[("A03S", 40)]),
        ]);

        let by_stop = arrivals_by_stop(&trips);

        assert_eq!(by_stop.len(), 2);
        assert_eq!(by_stop["A03"].stop_id, "A03");
        assert_eq!(by_stop["A03"].north["A"], vec![20]);
        assert_eq!(by_stop["A03"].south["C"], vec![30]);
        assert_eq!(by_stop["A03"].south["A"], vec![40]);
    }

    #[test]
    fn arrivals_json_shape() {
        let trips = trip_map(vec![schedule("1..N", "G", &[("G22N", 60)])]);
        let json = serde_json::to_value(arrivals_by_stop(&trips)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"G22": {"stopId": "G22", "N": {"G": [60]}, "S": {}}})
        );
    }

    #[test]
    fn failure_message_format() {
        assert_eq!(failure_message(&[]), "");
        assert_eq!(
            failure_message(&["J".to_string(), "Z".to_string()]),
            "Failed to load data for J, Z"
        );
    }

    #[test]
    fn cache_control_matches_ttl() {
        assert_eq!(
            cache_control(Duration::from_secs(60)),
            "public, max-age=60, s-maxage=60"
        );
    }

    #[test]
    fn trips_filtered_by_service_direction_and_known_stops() {
        let trips = trip_map(vec![
            schedule("036000_L..N", "L", &[("L01N", 10), ("X99N", 15), ("L02N", 20)]),
            schedule("037000_L..S", "L", &[("L02S", 30)]),
            schedule("038000_G..N", "G", &[("G22N", 40)]),
        ]);

        let views = trips_in_direction(&trips, "L", "N", |stop| stop.starts_with('L'));

        assert_eq!(
            views,
            vec![TripView {
                trip_id: "036000_L..N".to_string(),
                stops: vec![
                    TripStop { time: 10, stop_id: "L01".to_string() },
                    TripStop { time: 20, stop_id: "L02".to_string() },
                ],
            }]
        );
    }
}
