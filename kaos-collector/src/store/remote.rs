//! HTTP-fronted store backend. Talks to the shared KV store over a small
//! JSON RPC-ish surface: `PUT /kv/<key>?ttl=<secs>`, `GET /kv/<key>`,
//! `GET /ping`, `GET /keys?prefix=<p>`.
//!
//! Request construction follows `aa-rs::bundler::BundlerClient`: build with
//! `reqwest::Client`, `.send().await`, inspect status, decode JSON, wrap
//! errors with a message instead of propagating `reqwest::Error` directly.

use super::Store;
use crate::error::CollectorError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Clone)]
pub struct RemoteStore {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl RemoteStore {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> CollectorError {
        let code = status.as_u16();
        if (500..600).contains(&code) {
            CollectorError::ProviderUnavailable {
                status: code,
                message: body,
            }
        } else {
            CollectorError::StoreError(format!("HTTP {code}: {body}"))
        }
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CollectorError> {
        let url = format!("{}/kv/{}", self.base_url, key);
        let resp = self
            .auth(self.http.put(&url))
            .query(&[("ttl", ttl.as_secs().to_string())])
            .json(value)
            .send()
            .await
            .map_err(|e| CollectorError::StoreError(format!("PUT {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CollectorError> {
        let url = format!("{}/kv/{}", self.base_url, key);
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| CollectorError::StoreError(format!("GET {url} failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }
        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| CollectorError::DecodeError(e.to_string()))?;
        Ok(Some(value))
    }

    async fn put_meta_raw(&self, key: &str, value: &Value) -> Result<(), CollectorError> {
        // Metadata has no TTL; use a sentinel of 0 which the remote store
        // treats as "no expiry".
        self.put(key, value, Duration::from_secs(0)).await
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/ping", self.base_url);
        matches!(self.http.get(&url).send().await, Ok(r) if r.status().is_success())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CollectorError> {
        let url = format!("{}/keys", self.base_url);
        let resp = self
            .auth(self.http.get(&url))
            .query(&[("prefix", prefix)])
            .send()
            .await
            .map_err(|e| CollectorError::StoreError(format!("GET {url} failed: {e}")))?;
        resp.json::<Vec<String>>()
            .await
            .map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
}
