//! USGS seismic collector (§4.4): fetches several feed URLs (one per
//! magnitude/time window) in parallel, each becoming its own key. Features
//! lacking `geometry.coordinates[0..1]` are dropped.

use super::{MultiKeyCollector, MultiKeyPublisher};
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use crate::grid::PointRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One USGS GeoJSON summary feed and the key its normalized snapshot
/// publishes under.
pub struct UsgsFeed {
    pub key: String,
    pub url: String,
}

pub struct UsgsCollector {
    pub name: String,
    pub feeds: Vec<UsgsFeed>,
    pub ttl: Duration,
    pub client: reqwest::Client,
}

impl UsgsCollector {
    /// The standard small set of magnitude/time windows: all earthquakes in
    /// the last hour, all earthquakes in the last day, and the past week's
    /// "significant" (USGS-curated) events.
    pub fn standard(client: reqwest::Client) -> Self {
        let base = "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary";
        Self {
            name: "seismic".to_string(),
            feeds: vec![
                UsgsFeed { key: "kaos:seismic:all_hour".to_string(), url: format!("{base}/all_hour.geojson") },
                UsgsFeed { key: "kaos:seismic:all_day".to_string(), url: format!("{base}/all_day.geojson") },
                UsgsFeed {
                    key: "kaos:seismic:significant_week".to_string(),
                    url: format!("{base}/significant_week.geojson"),
                },
            ],
            ttl: Duration::from_secs(300),
            client,
        }
    }
}

/// Shared GeoJSON FeatureCollection -> PointCollection transform, used by
/// USGS and (with different field maps) GDACS.
pub fn features_to_points(
    geojson: &Value,
    field_map: impl Fn(&Value) -> Vec<(String, Value)>,
) -> Vec<PointRecord> {
    let mut out = Vec::new();
    let Some(features) = geojson.get("features").and_then(Value::as_array) else {
        return out;
    };

    for feature in features {
        let Some(coords) = feature
            .get("geometry")
            .and_then(|g| g.get("coordinates"))
            .and_then(Value::as_array)
        else {
            continue; // invariant: missing geometry.coordinates is dropped
        };
        let (Some(lon), Some(lat)) = (coords.first().and_then(Value::as_f64), coords.get(1).and_then(Value::as_f64))
        else {
            continue;
        };

        let time = feature
            .get("properties")
            .and_then(|p| p.get("time"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let mut record = PointRecord::new(lat, lon, time);
        for (k, v) in field_map(feature) {
            record.extra.insert(k, v);
        }
        out.push(record);
    }
    out
}

fn feature_to_fields(feature: &Value) -> Vec<(String, Value)> {
    let props = feature.get("properties");
    vec![
        ("mag".to_string(), props.and_then(|p| p.get("mag")).cloned().unwrap_or(Value::Null)),
        ("place".to_string(), props.and_then(|p| p.get("place")).cloned().unwrap_or(Value::Null)),
    ]
}

#[async_trait]
impl MultiKeyCollector for UsgsCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_attempts(&self) -> u32 {
        2
    }

    /// Fetches every configured feed in parallel; each feed that decodes
    /// successfully publishes under its own key, independent of its
    /// siblings' outcomes (§4.3). Fails the whole run only if every feed
    /// failed, so the retry loop doesn't re-fetch feeds that already
    /// succeeded.
    async fn collect_multi(&self, publisher: &MultiKeyPublisher<'_>) -> Result<(), CollectorError> {
        let policy = FetchPolicy::default();
        let options = FetchOptions::default();
        let cancel = CancellationToken::new();

        let responses = futures::future::join_all(
            self.feeds.iter().map(|feed| fetch(&self.client, &feed.url, &options, &policy, &cancel)),
        )
        .await;

        let mut any_ok = false;
        for (feed, response) in self.feeds.iter().zip(responses) {
            let decoded = response.and_then(|resp| resp.json());
            match decoded {
                Ok(geojson) => {
                    let points = features_to_points(&geojson, feature_to_fields);
                    match serde_json::to_value(&points) {
                        Ok(value) => {
                            any_ok = true;
                            publisher.put_to(&feed.key, &value, self.ttl).await;
                        }
                        Err(err) => {
                            tracing::warn!(collector = %self.name, feed = %feed.key, error = %err, "encode failed");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(collector = %self.name, feed = %feed.key, error = %err, "feed fetch failed; continuing with remaining feeds");
                }
            }
        }

        if !any_ok {
            return Err(CollectorError::TransientNetwork("all usgs feeds failed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_features_without_geometry() {
        let geojson = serde_json::json!({
            "features": [
                {"properties": {"mag": 4.2, "time": 1000}, "geometry": {"coordinates": [-118.0, 35.0]}},
                {"properties": {"mag": 1.0, "time": 2000}, "geometry": {}},
                {"properties": {"mag": 1.0, "time": 3000}},
            ]
        });

        let points = features_to_points(&geojson, |f| {
            vec![("mag".to_string(), f["properties"]["mag"].clone())]
        });

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].lat, 35.0);
        assert_eq!(points[0].lon, -118.0);
    }

    #[tokio::test]
    async fn scenario_single_earthquake_round_trips() {
        // §8 scenario 1: one earthquake at (35.0, -118.0, M4.2).
        let geojson = serde_json::json!({
            "features": [
                {"properties": {"mag": 4.2, "time": 1000, "place": "CA"},
                 "geometry": {"coordinates": [-118.0, 35.0]}}
            ]
        });
        let points = features_to_points(&geojson, |f| {
            vec![("mag".to_string(), f["properties"]["mag"].clone())]
        });
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].lat, 35.0);
        assert_eq!(points[0].lon, -118.0);
        assert_eq!(points[0].extra["mag"], serde_json::json!(4.2));
    }

    #[test]
    fn standard_feeds_cover_distinct_magnitude_time_windows() {
        let collector = UsgsCollector::standard(reqwest::Client::new());
        let keys: Vec<&str> = collector.feeds.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"kaos:seismic:all_hour"));
        assert!(keys.iter().collect::<std::collections::BTreeSet<_>>().len() == keys.len());
    }
}
