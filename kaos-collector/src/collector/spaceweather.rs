//! Space weather collector (§4.4): fans out to three independent SWPC
//! endpoints concurrently with `allSettled` semantics — a record is
//! produced whenever at least one succeeds, and a failed component is
//! represented as `absent` rather than failing the whole run.

use super::Collector;
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct SpaceWeatherCollector {
    pub kp_index_url: String,
    pub f107_flux_url: String,
    pub goes_xray_url: String,
    pub client: reqwest::Client,
}

impl SpaceWeatherCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            kp_index_url:
                "https://services.swpc.noaa.gov/products/noaa-planetary-k-index.json".to_string(),
            f107_flux_url: "https://services.swpc.noaa.gov/json/f107_cm_flux.json".to_string(),
            goes_xray_url: "https://services.swpc.noaa.gov/json/goes/primary/xrays-6-hour.json"
                .to_string(),
            client,
        }
    }
}

async fn fetch_component(
    client: &reqwest::Client,
    url: &str,
) -> Result<Value, CollectorError> {
    let resp = fetch(
        client,
        url,
        &FetchOptions::default(),
        &FetchPolicy::default(),
        &CancellationToken::new(),
    )
    .await?;
    resp.json()
}

/// Combine the three independently-settled component results per
/// `allSettled` semantics: a record is produced whenever at least one of
/// them succeeded, with the others stamped `"absent"`.
pub fn merge_settled(
    kp_index: Result<Value, CollectorError>,
    f107_flux: Result<Value, CollectorError>,
    goes_xray: Result<Value, CollectorError>,
) -> Option<Value> {
    let all_failed = kp_index.is_err() && f107_flux.is_err() && goes_xray.is_err();
    if all_failed {
        return None;
    }

    let as_field = |r: Result<Value, CollectorError>| match r {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "space weather component failed; marking absent");
            Value::String("absent".to_string())
        }
    };

    Some(serde_json::json!({
        "kpIndex": as_field(kp_index),
        "f107Flux": as_field(f107_flux),
        "goesXray": as_field(goes_xray),
    }))
}

#[async_trait]
impl Collector for SpaceWeatherCollector {
    fn name(&self) -> &str {
        "spaceweather"
    }

    fn key(&self) -> &str {
        "kaos:spaceweather:summary"
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(900)
    }

    fn retry_attempts(&self) -> u32 {
        1
    }

    async fn collect(&self) -> Result<Value, CollectorError> {
        let (kp_index, f107_flux, goes_xray) = tokio::join!(
            fetch_component(&self.client, &self.kp_index_url),
            fetch_component(&self.client, &self.f107_flux_url),
            fetch_component(&self.client, &self.goes_xray_url),
        );

        merge_settled(kp_index, f107_flux, goes_xray).ok_or_else(|| {
            CollectorError::ProviderUnavailable {
                status: 0,
                message: "all three space weather endpoints failed".to_string(),
            }
        })
    }
}
