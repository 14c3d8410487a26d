//! GDACS collector (§4.4): one GeoJSON feed, current-flagged features only,
//! deduplicated by `(eventtype, eventid, episodeid, geometry-class)`. For
//! tropical cyclones, reconstructs a track from `Point_Polygon_Point_*`
//! features ordered by numeric suffix, classifying each point as observed
//! or forecast by comparing its timestamp to now, and attaches the
//! `Poly_Cones` polygon as the forecast cone.

use super::Collector;
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct GdacsCollector {
    pub feed_url: String,
    pub client: reqwest::Client,
}

impl GdacsCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            feed_url: "https://www.gdacs.org/gdacsapi/api/events/geteventlist/SEARCH".to_string(),
            client,
        }
    }
}

fn geometry_class(feature: &Value) -> String {
    feature
        .get("geometry")
        .and_then(|g| g.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
        .to_string()
}

fn dedup_key(feature: &Value) -> Option<(String, String, String, String)> {
    let props = feature.get("properties")?;
    Some((
        props.get("eventtype")?.as_str()?.to_string(),
        props.get("eventid")?.to_string(),
        props.get("episodeid")?.to_string(),
        geometry_class(feature),
    ))
}

/// The feature in a tropical-cyclone group that carries the event's own
/// properties, as opposed to a `Point_Polygon_Point_*` track point or the
/// `Poly_Cones` forecast cone. Falls back to the first feature in the
/// group if every feature in it turns out to be a track point or cone.
fn pick_primary_cyclone_feature(group: &[Value]) -> Option<Value> {
    group
        .iter()
        .find(|f| {
            let name = f.get("properties").and_then(|p| p.get("name")).and_then(Value::as_str);
            match name {
                Some(n) => track_point_suffix(n).is_none() && n != "Poly_Cones",
                None => true,
            }
        })
        .or_else(|| group.first())
        .cloned()
}

fn is_current(feature: &Value) -> bool {
    feature
        .get("properties")
        .and_then(|p| p.get("iscurrent"))
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `Point_Polygon_Point_3` -> `3`; returns `None` for non-matching names.
fn track_point_suffix(name: &str) -> Option<u32> {
    name.strip_prefix("Point_Polygon_Point_")?.parse().ok()
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub lat: f64,
    pub lon: f64,
    pub time: i64,
    pub is_forecast: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycloneData {
    pub track_points: Vec<TrackPoint>,
    pub forecast_cone: Option<Value>,
}

fn feature_time(feature: &Value) -> Option<i64> {
    feature
        .get("properties")
        .and_then(|p| p.get("fromdate").or_else(|| p.get("todate")))
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
}

fn feature_point(feature: &Value) -> Option<(f64, f64)> {
    let coords = feature.get("geometry")?.get("coordinates")?.as_array()?;
    Some((coords.get(1)?.as_f64()?, coords.first()?.as_f64()?))
}

/// Reconstruct a tropical-cyclone track from the raw feature list
/// belonging to one event, given the current time in ms.
pub fn reconstruct_cyclone(features: &[Value], now_ms: i64) -> CycloneData {
    let mut ordered: Vec<(u32, &Value)> = features
        .iter()
        .filter_map(|f| {
            let name = f.get("properties")?.get("name")?.as_str()?;
            track_point_suffix(name).map(|suffix| (suffix, f))
        })
        .collect();
    ordered.sort_by_key(|(suffix, _)| *suffix);

    let track_points = ordered
        .into_iter()
        .filter_map(|(_, f)| {
            let (lat, lon) = feature_point(f)?;
            let time = feature_time(f).unwrap_or(now_ms);
            Some(TrackPoint {
                lat,
                lon,
                time,
                is_forecast: time > now_ms,
            })
        })
        .collect();

    let forecast_cone = features
        .iter()
        .find(|f| {
            f.get("properties")
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                == Some("Poly_Cones")
        })
        .cloned();

    CycloneData { track_points, forecast_cone }
}

#[async_trait]
impl Collector for GdacsCollector {
    fn name(&self) -> &str {
        "gdacs"
    }

    fn key(&self) -> &str {
        "kaos:disasters:gdacs"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(600)
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
        let geojson = resp.json()?;

        let features = geojson
            .get("features")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let current: Vec<Value> = features.into_iter().filter(is_current).collect();
        let events = build_events(current, crate::now_millis());

        serde_json::to_value(events).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

/// Group already-current-filtered features by (eventtype, eventid,
/// episodeid) before deduping, so that a tropical cyclone's
/// `Point_Polygon_Point_*` track points and its `Poly_Cones` forecast cone
/// — which share this triple but differ only by `name`/geometry-class —
/// stay together for `reconstruct_cyclone` instead of being collapsed by a
/// premature geometry-class dedup. Pulled out of `collect()` so the full
/// grouping path is unit-testable without a network fetch.
fn build_events(current: Vec<Value>, now_ms: i64) -> Vec<Value> {
    let mut groups: BTreeMap<(String, String, String), Vec<Value>> = BTreeMap::new();
    for feature in current {
        let Some(props) = feature.get("properties") else { continue };
        let eventtype = props.get("eventtype").and_then(Value::as_str);
        let eventid = props.get("eventid");
        let episodeid = props.get("episodeid");
        let (Some(eventtype), Some(eventid), Some(episodeid)) = (eventtype, eventid, episodeid) else {
            continue;
        };
        groups
            .entry((eventtype.to_string(), eventid.to_string(), episodeid.to_string()))
            .or_default()
            .push(feature);
    }

    let mut events: Vec<Value> = Vec::new();
    for ((eventtype, _, _), group) in groups {
        if eventtype == "TC" {
            let Some(mut primary) = pick_primary_cyclone_feature(&group) else { continue };
            let cyclone = reconstruct_cyclone(&group, now_ms);
            if let Some(obj) = primary.as_object_mut() {
                obj.insert("cycloneData".to_string(), serde_json::to_value(&cyclone).unwrap_or(Value::Null));
            }
            events.push(primary);
        } else {
            // Within a non-cyclone group, still collapse by the full
            // (eventtype, eventid, episodeid, geometry-class) key — a
            // disaster can legitimately have both a point and a polygon
            // feature, but not two of the same geometry class.
            let mut seen: std::collections::BTreeSet<(String, String, String, String)> =
                std::collections::BTreeSet::new();
            for feature in group {
                if let Some(key) = dedup_key(&feature) {
                    if seen.insert(key) {
                        events.push(feature);
                    }
                }
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_feature(suffix: u32, lat: f64, lon: f64, iso_time: &str) -> Value {
        serde_json::json!({
            "properties": {"name": format!("Point_Polygon_Point_{suffix}"), "fromdate": iso_time},
            "geometry": {"coordinates": [lon, lat]}
        })
    }

    #[test]
    fn scenario_cyclone_track_ordered_with_forecast_flags() {
        // §8 scenario 2: A(t-6h, obs), B(now, obs), C(t+6h, forecast).
        let now_ms = chrono::DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .unwrap()
            .timestamp_millis();
        let a = track_feature(1, 10.0, 120.0, "2026-06-01T06:00:00Z");
        let b = track_feature(2, 11.0, 121.0, "2026-06-01T12:00:00Z");
        let c = track_feature(3, 12.0, 122.0, "2026-06-01T18:00:00Z");
        let cone = serde_json::json!({"properties": {"name": "Poly_Cones"}, "geometry": {"type": "Polygon"}});

        let features = vec![c.clone(), a.clone(), cone.clone(), b.clone()];
        let data = reconstruct_cyclone(&features, now_ms);

        assert_eq!(data.track_points.len(), 3);
        assert_eq!(data.track_points[0].lat, 10.0);
        assert_eq!(data.track_points[1].lat, 11.0);
        assert_eq!(data.track_points[2].lat, 12.0);
        assert_eq!(
            data.track_points.iter().map(|p| p.is_forecast).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(data.forecast_cone, Some(cone));
    }

    #[test]
    fn collect_groups_track_points_and_cone_into_one_event() {
        // §8 scenario 2, exercised through the same grouping/dedup path
        // `collect()` runs, not by calling `reconstruct_cyclone` directly:
        // three `Point_Polygon_Point_N` siblings plus a `Poly_Cones` feature
        // sharing one (eventtype, eventid, episodeid) must collapse into a
        // single output event with a 3-point track and a non-null cone.
        fn with_ids(mut feature: Value) -> Value {
            feature["properties"]["eventtype"] = serde_json::json!("TC");
            feature["properties"]["eventid"] = serde_json::json!(700001);
            feature["properties"]["episodeid"] = serde_json::json!(5);
            feature
        }

        let now_ms = chrono::DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .unwrap()
            .timestamp_millis();
        let a = with_ids(track_feature(1, 10.0, 120.0, "2026-06-01T06:00:00Z"));
        let b = with_ids(track_feature(2, 11.0, 121.0, "2026-06-01T12:00:00Z"));
        let c = with_ids(track_feature(3, 12.0, 122.0, "2026-06-01T18:00:00Z"));
        let cone = with_ids(serde_json::json!({
            "properties": {"name": "Poly_Cones"},
            "geometry": {"type": "Polygon"}
        }));

        let current = vec![c, a, cone, b];
        let events = build_events(current, now_ms);

        assert_eq!(events.len(), 1);
        let cyclone_data = &events[0]["cycloneData"];
        assert_eq!(cyclone_data["trackPoints"].as_array().unwrap().len(), 3);
        assert!(!cyclone_data["forecastCone"].is_null());
    }

    #[test]
    fn dedup_key_uses_all_four_fields() {
        let f1 = serde_json::json!({
            "properties": {"eventtype": "EQ", "eventid": 1, "episodeid": 1},
            "geometry": {"type": "Point"}
        });
        let f2 = serde_json::json!({
            "properties": {"eventtype": "EQ", "eventid": 1, "episodeid": 2},
            "geometry": {"type": "Point"}
        });
        assert_ne!(dedup_key(&f1), dedup_key(&f2));
    }
}
