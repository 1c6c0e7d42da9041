//! Protobuf parser for GTFS Realtime feeds and adaptation into the
//! engine's own records.

use prost::Message;

use crate::error::FeedError;
use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::trip_update::StopTimeUpdate;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`FeedError::Decode`] if the bytes are not valid protobuf for a
/// `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, FeedError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Observed timestamp of the vehicle serving a trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleObservation {
    pub trip_id: String,
    pub observed_at: Option<i64>,
}

/// One stop of a trip update, with the direction character split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub stop_id: String,
    pub direction: String,
    /// Arrival time, or departure time when no arrival is published.
    pub time: Option<i64>,
}

impl StopEvent {
    fn from_update(update: &StopTimeUpdate) -> Option<Self> {
        let raw = update.stop_id.as_deref()?;
        let (stop_id, direction) = split_direction(raw);
        let time = update
            .arrival
            .as_ref()
            .and_then(|e| e.time)
            .or_else(|| update.departure.as_ref().and_then(|e| e.time));
        Some(Self {
            stop_id: stop_id.to_string(),
            direction: direction.to_string(),
            time,
        })
    }

    /// Stop id with its direction suffix restored, e.g. `L01N`.
    pub fn raw_stop_id(&self) -> String {
        format!("{}{}", self.stop_id, self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripUpdateRecord {
    pub trip_id: String,
    pub service: String,
    pub stops: Vec<StopEvent>,
}

/// Everything the merge needs from one feed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFeed {
    pub feed_id: String,
    /// Feed header timestamp, the as-of time for delay computation.
    pub header_timestamp: Option<i64>,
    pub vehicles: Vec<VehicleObservation>,
    pub trip_updates: Vec<TripUpdateRecord>,
}

/// Splits the trailing direction character off a raw stop id.
///
/// `"L01N"` becomes `("L01", "N")`. An empty id yields two empty strings.
pub fn split_direction(raw: &str) -> (&str, &str) {
    match raw.char_indices().last() {
        Some((idx, _)) => raw.split_at(idx),
        None => ("", ""),
    }
}

/// Parses `bytes` and extracts trip updates and vehicle positions.
///
/// Entities without a trip id are ignored, as are deleted entities.
pub fn decode_snapshot(feed_id: &str, bytes: &[u8]) -> Result<DecodedFeed, FeedError> {
    let feed = parse_feed(bytes)?;
    let header_timestamp = feed.header.timestamp.and_then(|t| i64::try_from(t).ok());

    let mut vehicles = Vec::new();
    let mut trip_updates = Vec::new();

    for entity in &feed.entity {
        if entity.is_deleted == Some(true) {
            continue;
        }

        if let Some(vehicle) = &entity.vehicle {
            if let Some(trip_id) = vehicle.trip.as_ref().and_then(|t| t.trip_id.clone()) {
                vehicles.push(VehicleObservation {
                    trip_id,
                    observed_at: vehicle.timestamp.and_then(|t| i64::try_from(t).ok()),
                });
            }
        }

        if let Some(update) = &entity.trip_update {
            let Some(trip_id) = update.trip.trip_id.clone() else {
                continue;
            };
            trip_updates.push(TripUpdateRecord {
                trip_id,
                service: update.trip.route_id.clone().unwrap_or_default(),
                stops: update
                    .stop_time_update
                    .iter()
                    .filter_map(StopEvent::from_update)
                    .collect(),
            });
        }
    }

    Ok(DecodedFeed {
        feed_id: feed_id.to_string(),
        header_timestamp,
        vehicles,
        trip_updates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::StopTimeEvent;
    use crate::gtfs_rt::{
        FeedEntity, FeedHeader, TripDescriptor, TripUpdate, VehiclePosition,
    };

    fn create_header(timestamp: Option<u64>) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp,
            incrementality: None,
            feed_version: None,
        }
    }

    fn trip(trip_id: &str, route_id: &str) -> TripDescriptor {
        TripDescriptor {
            trip_id: Some(trip_id.to_string()),
            route_id: Some(route_id.to_string()),
            ..Default::default()
        }
    }

    fn stop_update(stop_id: &str, arrival: Option<i64>, departure: Option<i64>) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_id: Some(stop_id.to_string()),
            arrival: arrival.map(|time| StopTimeEvent {
                time: Some(time),
                ..Default::default()
            }),
            departure: departure.map(|time| StopTimeEvent {
                time: Some(time),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // An empty buffer is a valid (all-default) FeedMessage
        let feed = parse_feed(&[]).unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        let result = parse_feed(&invalid_bytes);
        assert!(matches!(result, Err(FeedError::Decode(_))));
    }

    #[test]
    fn test_split_direction() {
        assert_eq!(split_direction("L01N"), ("L01", "N"));
        assert_eq!(split_direction("S"), ("", "S"));
        assert_eq!(split_direction(""), ("", ""));
    }

    #[test]
    fn test_decode_trip_update_and_vehicle() {
        let feed = FeedMessage {
            header: create_header(Some(1000)),
            entity: vec![
                FeedEntity {
                    id: "1".to_string(),
                    trip_update: Some(TripUpdate {
                        trip: trip("T1", "L"),
                        stop_time_update: vec![
                            stop_update("L01N", Some(1000), None),
                            stop_update("L02N", None, Some(1100)),
                            stop_update("L03N", None, None),
                        ],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                FeedEntity {
                    id: "2".to_string(),
                    vehicle: Some(VehiclePosition {
                        trip: Some(trip("T1", "L")),
                        timestamp: Some(900),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
        };

        let decoded = decode_snapshot("2", &feed.encode_to_vec()).unwrap();

        assert_eq!(decoded.feed_id, "2");
        assert_eq!(decoded.header_timestamp, Some(1000));
        assert_eq!(
            decoded.vehicles,
            vec![VehicleObservation {
                trip_id: "T1".to_string(),
                observed_at: Some(900),
            }]
        );
        assert_eq!(decoded.trip_updates.len(), 1);
        let update = &decoded.trip_updates[0];
        assert_eq!(update.service, "L");
        assert_eq!(update.stops.len(), 3);
        assert_eq!(update.stops[0].stop_id, "L01");
        assert_eq!(update.stops[0].direction, "N");
        assert_eq!(update.stops[0].time, Some(1000));
        assert_eq!(update.stops[1].time, Some(1100));
        assert_eq!(update.stops[2].time, None);
        assert_eq!(update.stops[1].raw_stop_id(), "L02N");
    }

    #[test]
    fn test_decode_skips_deleted_and_tripless_entities() {
        let feed = FeedMessage {
            header: create_header(None),
            entity: vec![
                FeedEntity {
                    id: "deleted".to_string(),
                    is_deleted: Some(true),
                    trip_update: Some(TripUpdate {
                        trip: trip("T9", "G"),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                FeedEntity {
                    id: "no-trip".to_string(),
                    vehicle: Some(VehiclePosition {
                        timestamp: Some(10),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
        };

        let decoded = decode_snapshot("31", &feed.encode_to_vec()).unwrap();

        assert_eq!(decoded.header_timestamp, None);
        assert!(decoded.vehicles.is_empty());
        assert!(decoded.trip_updates.is_empty());
    }
}
