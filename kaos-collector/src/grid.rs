//! Shared snapshot value shapes (§3). All three recur across collectors:
//! point collections (earthquakes, incidents, stations), regular gridded
//! fields (GFS variables, TEC, aurora), and two-component vector fields
//! (wind, currents).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single point observation. `extra` carries feed-specific fields so one
/// struct can serve earthquakes, APRS stations, aircraft, and lightning
/// strikes alike without a per-feed wrapper type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRecord {
    pub lat: f64,
    pub lon: f64,
    /// Milliseconds since epoch.
    pub time: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PointRecord {
    pub fn new(lat: f64, lon: f64, time: i64) -> Self {
        Self {
            lat,
            lon,
            time,
            extra: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Ordered sequence of point observations, the shape published for feeds
/// like `kaos:seismic:all_hour` or `kaos:lightning:global`.
pub type PointCollection = Vec<PointRecord>;

/// Header for a regular lat/lon grid. `lo1`/`la1` is the north-west corner;
/// values are row-major with latitude decreasing and longitude increasing.
/// Longitude convention (0..360 vs -180..180) is preserved here and NOT
/// normalized, per §4.4.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridHeader {
    pub nx: usize,
    pub ny: usize,
    pub lo1: f64,
    pub la1: f64,
    pub dx: f64,
    pub dy: f64,
}

/// A regular gridded field. `NaN` cells are serialized as JSON `null`
/// (§6) via the custom (de)serialization below so readers tolerate either
/// representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridField {
    pub header: GridHeader,
    #[serde(with = "nan_as_null")]
    pub data: Vec<f64>,
    pub unit: String,
    pub name: String,
}

impl GridField {
    /// §8 "grid conservation" invariant.
    pub fn is_conserved(&self) -> bool {
        self.data.len() == self.header.nx * self.header.ny
    }
}

/// Exactly two grid components, U (east-positive) and V (north-positive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorField {
    pub u: GridField,
    pub v: GridField,
}

/// Serializes `NaN` as JSON `null` and accepts `null` back as `NaN` on
/// read, per the §6 wire contract ("`NaN` ... either the JSON value `null`
/// or a language-specific sentinel encoded as `null`. Readers MUST
/// tolerate both.").
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let wire: Vec<Option<f64>> = values
            .iter()
            .map(|v| if v.is_finite() { Some(*v) } else { None })
            .collect();
        wire.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let wire = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(wire.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_conservation_holds_for_matching_dims() {
        let field = GridField {
            header: GridHeader {
                nx: 2,
                ny: 2,
                lo1: 0.0,
                la1: 90.0,
                dx: 0.25,
                dy: 0.25,
            },
            data: vec![1.0, 2.0, 3.0, 4.0],
            unit: "K".into(),
            name: "t".into(),
        };
        assert!(field.is_conserved());
    }

    #[test]
    fn grid_conservation_fails_for_mismatched_dims() {
        let field = GridField {
            header: GridHeader {
                nx: 2,
                ny: 2,
                lo1: 0.0,
                la1: 90.0,
                dx: 0.25,
                dy: 0.25,
            },
            data: vec![1.0, 2.0, 3.0],
            unit: "K".into(),
            name: "t".into(),
        };
        assert!(!field.is_conserved());
    }

    #[test]
    fn nan_round_trips_through_null() {
        let field = GridField {
            header: GridHeader {
                nx: 1,
                ny: 2,
                lo1: 0.0,
                la1: 0.0,
                dx: 1.0,
                dy: 1.0,
            },
            data: vec![f64::NAN, 5.0],
            unit: "TECU".into(),
            name: "tec".into(),
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["data"][0], Value::Null);
        let back: GridField = serde_json::from_value(json).unwrap();
        assert!(back.data[0].is_nan());
        assert_eq!(back.data[1], 5.0);
    }
}
