//! Fetcher (C2): HTTP with timeout, exponential retry, optional
//! decompression, abortable via a `CancellationToken`.
//!
//! The retry loop follows `keeper-rs::scanner::fetch_logs_with_retries`:
//! a bounded attempt count, exponential backoff, and a `tracing::warn!` on
//! each retried attempt naming the attempt number and sleep duration.

use crate::error::CollectorError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: Vec<(String, String)>,
    pub accept_gzip: bool,
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
        }
    }
}

pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn text(&self) -> Result<String, CollectorError> {
        String::from_utf8(self.body.clone()).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }

    pub fn json(&self) -> Result<serde_json::Value, CollectorError> {
        serde_json::from_slice(&self.body).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}

pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
    policy: &FetchPolicy,
    cancel: &CancellationToken,
) -> Result<FetchResponse, CollectorError> {
    // Exponential backoff starting at 1s, doubling per attempt (§4.2).
    let mut delay = Duration::from_secs(1);
    let attempts = policy.retries + 1;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        let result = do_one_fetch(client, url, options, policy.timeout, cancel).await;

        match result {
            Ok(resp) => return Ok(resp),
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    url,
                    attempt,
                    sleep_ms = delay.as_millis() as u64,
                    error = %err,
                    "fetch failed; retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
                }
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("loop always returns within the attempt budget")
}

async fn do_one_fetch(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<FetchResponse, CollectorError> {
    let mut builder = client.get(url);
    for (name, value) in &options.headers {
        builder = builder.header(name, value);
    }
    if options.accept_gzip {
        builder = builder.header("Accept-Encoding", "gzip");
    }

    let send = builder.send();
    let response = tokio::select! {
        res = tokio::time::timeout(timeout, send) => res
            .map_err(|_| CollectorError::TransientNetwork(format!("timed out after {:?}", timeout)))?
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?,
        _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
    };

    let status = response.status();
    let code = status.as_u16();

    if (500..600).contains(&code) {
        let message = response.text().await.unwrap_or_default();
        return Err(CollectorError::ProviderUnavailable { status: code, message });
    }
    if status.is_client_error() {
        let message = response.text().await.unwrap_or_default();
        return Err(CollectorError::ProviderRejected { status: code, message });
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(CollectorError::ProviderUnavailable { status: code, message });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?
        .to_vec();

    Ok(FetchResponse { status: code, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_match_spec() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.retries, 2);
    }

    #[test]
    fn five_xx_and_transport_errors_are_retryable_four_xx_is_not() {
        assert!(CollectorError::ProviderUnavailable { status: 503, message: String::new() }.is_retryable());
        assert!(CollectorError::TransientNetwork(String::new()).is_retryable());
        assert!(!CollectorError::ProviderRejected { status: 404, message: String::new() }.is_retryable());
    }
}
