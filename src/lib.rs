//! Aggregates GTFS-RT subway feeds into one trip/stop view behind a TTL
//! cache, falling back to stored snapshots when a live feed fails.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod sources;
pub mod stations;
pub mod store;
pub mod views;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
