//! Fogos.pt civil protection collector (§4.4): fetches "active" and
//! "last-24h search" feeds in parallel, merges by `id` with active records
//! winning, filters entries older than 24h.

use super::Collector;
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct FogosCollector {
    pub active_url: String,
    pub search_24h_url: String,
    pub client: reqwest::Client,
}

impl FogosCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            active_url: "https://api.fogos.pt/new/fires".to_string(),
            search_24h_url: "https://api.fogos.pt/v2/incidents/active?search=1".to_string(),
            client,
        }
    }
}

fn entry_id(entry: &Value) -> Option<String> {
    entry.get("id").map(|v| v.to_string())
}

fn entry_age_hours(entry: &Value, now_ms: i64) -> Option<f64> {
    let dt = entry.get("dateTime").and_then(Value::as_i64)?;
    Some((now_ms - dt) as f64 / 3_600_000.0)
}

/// Merge two entry lists by id, with `active` records always winning over
/// `search24h` ones, then drop anything older than 24h.
pub fn merge_active_wins(active: Vec<Value>, search_24h: Vec<Value>, now_ms: i64) -> Vec<Value> {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();

    for entry in search_24h {
        if let Some(id) = entry_id(&entry) {
            merged.insert(id, entry);
        }
    }
    for entry in active {
        if let Some(id) = entry_id(&entry) {
            merged.insert(id, entry); // active wins: inserted last
        }
    }

    merged
        .into_values()
        .filter(|e| entry_age_hours(e, now_ms).map(|h| h <= 24.0).unwrap_or(true))
        .collect()
}

#[async_trait]
impl Collector for FogosCollector {
    fn name(&self) -> &str {
        "fogos"
    }

    fn key(&self) -> &str {
        "kaos:incidents:fogos"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(120)
    }

    fn retry_attempts(&self) -> u32 {
        2
    }

    async fn collect(&self) -> Result<Value, CollectorError> {
        let policy = FetchPolicy::default();
        let options = FetchOptions::default();
        let cancel = CancellationToken::new();

        let (active_resp, search_resp) = tokio::join!(
            fetch(&self.client, &self.active_url, &options, &policy, &cancel),
            fetch(&self.client, &self.search_24h_url, &options, &policy, &cancel),
        );

        let active = parse_entries(active_resp?.json()?);
        let search_24h = parse_entries(search_resp?.json()?);

        let merged = merge_active_wins(active, search_24h, crate::now_millis());
        serde_json::to_value(merged).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

fn parse_entries(body: Value) -> Vec<Value> {
    body.get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_wins_over_search_24h() {
        let active = vec![serde_json::json!({"id": 1, "dateTime": 1000, "status": "active"})];
        let search = vec![serde_json::json!({"id": 1, "dateTime": 1000, "status": "stale"})];
        let merged = merge_active_wins(active, search, 1000);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["status"], "active");
    }

    #[test]
    fn entries_older_than_24h_are_dropped() {
        let now = 100_000_000i64;
        let day_ms = 24 * 3_600_000;
        let fresh = serde_json::json!({"id": 1, "dateTime": now - 1000});
        let stale = serde_json::json!({"id": 2, "dateTime": now - day_ms - 1});
        let merged = merge_active_wins(vec![fresh, stale], vec![], now);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["id"], 1);
    }
}
