//! Ionosphere TEC and aurora collectors (§4.4): fetch a global JSON feed of
//! sparse `{lat, lon, value}` samples and reshape them into the gridded-field
//! layout of §3, filling any cell with no matching sample with `NaN`.

use super::Collector;
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use crate::grid::{GridField, GridHeader};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Row-major index for `(lat, lon)` against `header`, north to south,
/// west to east, or `None` when the sample falls outside the grid.
fn cell_index(header: &GridHeader, lat: f64, lon: f64) -> Option<usize> {
    let row = ((header.la1 - lat) / header.dy).round();
    let col = ((lon - header.lo1) / header.dx).round();
    if row < 0.0 || col < 0.0 || row as usize >= header.ny || col as usize >= header.nx {
        return None;
    }
    Some(row as usize * header.nx + col as usize)
}

/// Reshape sparse `(lat, lon, value)` samples into `header`'s grid,
/// leaving unmatched cells as `NaN`.
pub fn reshape_to_grid(
    header: GridHeader,
    samples: &[(f64, f64, f64)],
    unit: &str,
    name: &str,
) -> GridField {
    let mut data = vec![f64::NAN; header.nx * header.ny];
    for &(lat, lon, value) in samples {
        if let Some(idx) = cell_index(&header, lat, lon) {
            data[idx] = value;
        }
    }
    GridField { header, data, unit: unit.to_string(), name: name.to_string() }
}

fn parse_samples(body: &Value) -> Vec<(f64, f64, f64)> {
    body.get("samples")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|s| {
                    Some((
                        s.get("lat")?.as_f64()?,
                        s.get("lon")?.as_f64()?,
                        s.get("value")?.as_f64()?,
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn grid_header_from_body(body: &Value) -> Option<GridHeader> {
    let h = body.get("grid")?;
    Some(GridHeader {
        nx: h.get("nx")?.as_u64()? as usize,
        ny: h.get("ny")?.as_u64()? as usize,
        lo1: h.get("lo1")?.as_f64()?,
        la1: h.get("la1")?.as_f64()?,
        dx: h.get("dx")?.as_f64()?,
        dy: h.get("dy")?.as_f64()?,
    })
}

pub struct TecCollector {
    pub feed_url: String,
    pub client: reqwest::Client,
}

impl TecCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { feed_url: "https://www.temis.nl/latest/tecsnapshot.json".to_string(), client }
    }
}

#[async_trait]
impl Collector for TecCollector {
    fn name(&self) -> &str {
        "tec"
    }

    fn key(&self) -> &str {
        "kaos:ionosphere:tec"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(1800)
    }

    fn retry_attempts(&self) -> u32 {
        2
    }

    async fn collect(&self) -> Result<Value, CollectorError> {
        let resp = fetch(
            &self.client,
            &self.feed_url,
            &FetchOptions::default(),
            &FetchPolicy::default(),
            &CancellationToken::new(),
        )
        .await?;
        let body = resp.json()?;
        let header = grid_header_from_body(&body)
            .ok_or_else(|| CollectorError::DecodeError("missing grid header".to_string()))?;
        let samples = parse_samples(&body);
        let field = reshape_to_grid(header, &samples, "TECU", "tec");
        serde_json::to_value(field).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

pub struct AuroraCollector {
    pub feed_url: String,
    pub client: reqwest::Client,
}

impl AuroraCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            feed_url: "https://services.swpc.noaa.gov/json/ovation_aurora_latest.json".to_string(),
            client,
        }
    }
}

#[async_trait]
impl Collector for AuroraCollector {
    fn name(&self) -> &str {
        "aurora"
    }

    fn key(&self) -> &str {
        "kaos:ionosphere:aurora"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(1800)
    }

    fn retry_attempts(&self) -> u32 {
        2
    }

    async fn collect(&self) -> Result<Value, CollectorError> {
        let resp = fetch(
            &self.client,
            &self.feed_url,
            &FetchOptions::default(),
            &FetchPolicy::default(),
            &CancellationToken::new(),
        )
        .await?;
        let body = resp.json()?;
        let header = grid_header_from_body(&body)
            .ok_or_else(|| CollectorError::DecodeError("missing grid header".to_string()))?;
        let samples = parse_samples(&body);
        let field = reshape_to_grid(header, &samples, "probability", "aurora");
        serde_json::to_value(field).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> GridHeader {
        GridHeader { nx: 3, ny: 2, lo1: 0.0, la1: 10.0, dx: 10.0, dy: 10.0 }
    }

    #[test]
    fn unmatched_cells_are_nan() {
        let field = reshape_to_grid(header(), &[(10.0, 0.0, 5.0)], "TECU", "tec");
        assert_eq!(field.data[0], 5.0);
        assert!(field.data[1].is_nan());
        assert!(field.is_conserved());
    }

    #[test]
    fn sample_outside_grid_is_dropped() {
        let field = reshape_to_grid(header(), &[(99.0, 99.0, 1.0)], "TECU", "tec");
        assert!(field.data.iter().all(|v| v.is_nan()));
    }
}
