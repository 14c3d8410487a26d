//! KiwiSDR directory scraper (§4.4): each station lives in a `div.cl-entry`;
//! its fields are HTML comments of the form `<!-- key=value -->` nested
//! inside that div rather than actual attributes.

use super::Collector;
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct KiwiSdrCollector {
    pub directory_url: String,
    pub client: reqwest::Client,
}

impl KiwiSdrCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            directory_url: "http://kiwisdr.com/public/".to_string(),
            client,
        }
    }
}

static COMMENT_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--\s*([a-zA-Z_]+)=(.*?)\s*-->").unwrap());

const MAX_NAME_LEN: usize = 200;

fn parse_fields(entry_html: &str) -> std::collections::HashMap<String, String> {
    COMMENT_FIELD
        .captures_iter(entry_html)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect()
}

fn parse_gps(raw: &str) -> Option<(f64, f64)> {
    let raw = raw.trim_matches(|c| c == '(' || c == ')');
    let mut parts = raw.split(',');
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    Some((lat, lon))
}

fn first_of_pair(raw: &str) -> Option<f64> {
    raw.split(',').next()?.trim().parse().ok()
}

/// Parse one `div.cl-entry` inner HTML block into a station record.
pub fn parse_entry(entry_html: &str) -> Option<Value> {
    let fields = parse_fields(entry_html);

    let (lat, lon) = fields.get("gps").and_then(|g| parse_gps(g))?;

    let mut name = fields.get("name").cloned().unwrap_or_default();
    if name.len() > MAX_NAME_LEN {
        name.truncate(MAX_NAME_LEN);
    }

    let snr = fields.get("snr").and_then(|s| first_of_pair(s));
    let users = fields.get("users").and_then(|u| u.parse::<u32>().ok());
    let offline = fields
        .get("offline")
        .map(|o| o == "1" || o.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Some(serde_json::json!({
        "name": name,
        "lat": lat,
        "lon": lon,
        "users": users,
        "antenna": fields.get("antenna"),
        "location": fields.get("loc"),
        "snr": snr,
        "offline": offline,
    }))
}

fn extract_stations(document_html: &str) -> Vec<Value> {
    let document = Html::parse_document(document_html);
    let selector = Selector::parse("div.cl-entry").unwrap();

    document
        .select(&selector)
        .filter_map(|el| parse_entry(&el.html()))
        .collect()
}

#[async_trait]
impl Collector for KiwiSdrCollector {
    fn name(&self) -> &str {
        "kiwisdr"
    }

    fn key(&self) -> &str {
        "kaos:stations:kiwisdr"
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
            &self.directory_url,
            &FetchOptions::default(),
            &FetchPolicy::default(),
            &CancellationToken::new(),
        )
        .await?;
        let html = resp.text()?;
        let stations = extract_stations(&html);
        serde_json::to_value(stations).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comment_encoded_fields() {
        let entry = r#"<div class="cl-entry">
            <!-- name=Lisbon Tower -->
            <!-- gps=(38.7223, -9.1393) -->
            <!-- users=3 -->
            <!-- antenna=vertical dipole -->
            <!-- loc=Lisbon, PT -->
            <!-- snr=21,14 -->
            <!-- offline=0 -->
        </div>"#;
        let record = parse_entry(entry).unwrap();
        assert_eq!(record["name"], "Lisbon Tower");
        assert_eq!(record["lat"], 38.7223);
        assert_eq!(record["lon"], -9.1393);
        assert_eq!(record["snr"], 21.0);
        assert_eq!(record["users"], 3);
        assert_eq!(record["offline"], false);
    }

    #[test]
    fn truncates_name_to_200_chars() {
        let long_name = "x".repeat(250);
        let entry = format!(
            "<!-- name={long_name} --><!-- gps=(0, 0) -->",
        );
        let record = parse_entry(&entry).unwrap();
        assert_eq!(record["name"].as_str().unwrap().len(), 200);
    }

    #[test]
    fn missing_gps_drops_station() {
        let entry = "<!-- name=no-gps -->";
        assert!(parse_entry(entry).is_none());
    }
}
