//! Station metadata generated from the static GTFS and station CSVs.
//!
//! Only the platform ids are used by the engine: they decide which stop ids
//! count as recognized when building per-trip views.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Station {
    pub name: String,
    #[serde(default)]
    pub platforms: Vec<Platform>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationFile {
    station_info: HashMap<String, Station>,
}

/// Platform ids and names keyed by canonical stop id.
#[derive(Debug, Clone, Default)]
pub struct StationIndex {
    platforms: HashMap<String, Platform>,
}

impl StationIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading station data {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: StationFile = serde_json::from_str(content)?;
        let platforms = file
            .station_info
            .into_values()
            .flat_map(|station| station.platforms)
            .map(|platform| (platform.id.clone(), platform))
            .collect();
        Ok(Self { platforms })
    }

    pub fn contains(&self, stop_id: &str) -> bool {
        self.platforms.contains_key(stop_id)
    }

    pub fn platform(&self, stop_id: &str) -> Option<&Platform> {
        self.platforms.get(stop_id)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "stationInfo": {
        "120": {
          "name": "Lorimer St / Metropolitan Av",
          "borough": "Bk",
          "crossover": true,
          "ada": false,
          "platforms": [
            {"id": "L10", "name": "Lorimer St", "routes": ["L"], "latitude": 40.71, "longitude": -73.95},
            {"id": "G29", "name": "Metropolitan Av", "routes": ["G"], "latitude": 40.71, "longitude": -73.95}
          ]
        }
      }
    }"#;

    #[test]
    fn indexes_platforms_by_stop_id() {
        let index = StationIndex::from_json(SAMPLE).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains("L10"));
        assert!(index.contains("G29"));
        assert!(!index.contains("L10N"));
        assert_eq!(index.platform("G29").unwrap().name, "Metropolitan Av");
    }

    #[test]
    fn rejects_missing_station_info() {
        assert!(StationIndex::from_json(r#"{"stations": {}}"#).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = StationIndex::load("/nonexistent/stations.json").unwrap_err();
        assert!(err.to_string().contains("reading station data"));
    }
}
