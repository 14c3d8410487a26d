//! IPMA weather-warning collector (§4.4): drops severity `green` and
//! expired entries, groups the remainder by area code, sorts within each
//! group by severity (red > orange > yellow > green) then by start time,
//! and takes the group's overall severity from its first entry.

use super::Collector;
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct IpmaCollector {
    pub feed_url: String,
    pub client: reqwest::Client,
}

impl IpmaCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            feed_url: "https://api.ipma.pt/open-data/forecast/warnings/warnings_www.json"
                .to_string(),
            client,
        }
    }
}

/// Awareness level ordering, green < yellow < orange < red (GLOSSARY).
fn severity_rank(level: &str) -> u8 {
    match level {
        "red" => 3,
        "orange" => 2,
        "yellow" => 1,
        _ => 0,
    }
}

fn is_expired(entry: &Value, now_ms: i64) -> bool {
    entry
        .get("endTime")
        .and_then(Value::as_i64)
        .map(|end| end < now_ms)
        .unwrap_or(false)
}

fn start_time(entry: &Value) -> i64 {
    entry.get("startTime").and_then(Value::as_i64).unwrap_or(0)
}

fn severity_of(entry: &Value) -> String {
    entry
        .get("awarenessLevelID")
        .and_then(Value::as_str)
        .unwrap_or("green")
        .to_string()
}

fn area_code(entry: &Value) -> String {
    entry
        .get("idAreaAviso")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Group warning entries by area, dropping `green`/expired, sort each
/// group by severity desc then start time asc, and stamp the group's
/// overall severity from its first (most severe / earliest) entry.
pub fn group_by_area(entries: Vec<Value>, now_ms: i64) -> Vec<Value> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();

    for entry in entries {
        if severity_of(&entry) == "green" || is_expired(&entry, now_ms) {
            continue;
        }
        groups.entry(area_code(&entry)).or_default().push(entry);
    }

    groups
        .into_iter()
        .map(|(area, mut members)| {
            members.sort_by(|a, b| {
                severity_rank(&severity_of(b))
                    .cmp(&severity_rank(&severity_of(a)))
                    .then_with(|| start_time(a).cmp(&start_time(b)))
            });
            let overall_severity = members
                .first()
                .map(severity_of)
                .unwrap_or_else(|| "green".to_string());
            serde_json::json!({
                "area": area,
                "severity": overall_severity,
                "warnings": members,
            })
        })
        .collect()
}

#[async_trait]
impl Collector for IpmaCollector {
    fn name(&self) -> &str {
        "ipma"
    }

    fn key(&self) -> &str {
        "kaos:warnings:ipma"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(900)
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
        let entries = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let grouped = group_by_area(entries, crate::now_millis());
        serde_json::to_value(grouped).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(area: &str, level: &str, start: i64, end: i64) -> Value {
        serde_json::json!({
            "idAreaAviso": area,
            "awarenessLevelID": level,
            "startTime": start,
            "endTime": end,
        })
    }

    #[test]
    fn green_and_expired_are_dropped() {
        let entries = vec![
            warning("AVR", "green", 0, 1000),
            warning("AVR", "yellow", 0, 1),
            warning("AVR", "orange", 0, 1000),
        ];
        let grouped = group_by_area(entries, 500);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0]["severity"], "orange");
        assert_eq!(grouped[0]["warnings"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn sorts_by_severity_desc_then_start_time_asc() {
        let entries = vec![
            warning("LSB", "yellow", 200, 10_000),
            warning("LSB", "red", 300, 10_000),
            warning("LSB", "red", 100, 10_000),
        ];
        let grouped = group_by_area(entries, 0);
        let warnings = grouped[0]["warnings"].as_array().unwrap();
        assert_eq!(warnings[0]["startTime"], 100);
        assert_eq!(warnings[1]["startTime"], 300);
        assert_eq!(warnings[2]["startTime"], 200);
        assert_eq!(grouped[0]["severity"], "red");
    }
}
