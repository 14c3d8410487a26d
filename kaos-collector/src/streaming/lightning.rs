//! Lightning WebSocket collector (§4.6): JSON-framed strike messages,
//! an in-memory sequence flushed every `persist_interval` (default 10 s)
//! and evicted below a 30-minute horizon, with reconnect-after-10s on
//! disconnect.

use crate::error::CollectorError;
use crate::meta::CollectorStatus;
use crate::store::Store;
use crate::streaming::StreamingCollector;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const PERSIST_INTERVAL: Duration = Duration::from_secs(10);
const EVICT_INTERVAL: Duration = Duration::from_secs(60);
const EVICTION_HORIZON_MS: i64 = 30 * 60 * 1000;
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const PERSIST_KEY: &str = "kaos:lightning:global";
const PERSIST_TTL: Duration = Duration::from_secs(60);
const MAX_STRIKES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strike {
    pub lat: f64,
    pub lon: f64,
    pub time_ms: i64,
}

/// Decode one WebSocket text frame into a strike, or `None` for
/// non-strike / malformed frames (dropped silently per §7).
pub fn parse_strike_frame(text: &str) -> Option<Strike> {
    serde_json::from_str(text).ok()
}

#[derive(Clone)]
struct LightningShared {
    endpoint: Arc<str>,
    store: Arc<dyn Store>,
    strikes: Arc<Mutex<Vec<Strike>>>,
    cancel: CancellationToken,
}

impl LightningShared {
    async fn connect_and_pump(&self) -> Result<(), CollectorError> {
        let (ws, _response) = tokio_tungstenite::connect_async(self.endpoint.as_ref())
            .await
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?;

        self.store.set_meta("lightning", CollectorStatus::Ok, 0, crate::now_millis()).await;

        let (_write, mut read) = ws.split();
        loop {
            let next = tokio::select! {
                msg = read.next() => msg,
                _ = self.cancel.cancelled() => return Ok(()),
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    if let Some(strike) = parse_strike_frame(&text) {
                        self.strikes.lock().await.push(strike);
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(CollectorError::TransientNetwork(e.to_string())),
            }
        }
    }

    async fn persist_once(&self) {
        let snapshot = {
            let mut strikes = self.strikes.lock().await.clone();
            strikes.sort_by(|a, b| b.time_ms.cmp(&a.time_ms));
            strikes.truncate(MAX_STRIKES);
            strikes
        };
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(err) = self.store.put(PERSIST_KEY, &value, PERSIST_TTL).await {
                    tracing::error!(collector = "lightning", error = %err, "persist failed");
                    return;
                }
                self.store.set_meta("lightning", CollectorStatus::Ok, 0, crate::now_millis()).await;
            }
            Err(err) => tracing::warn!(collector = "lightning", error = %err, "serialize failed"),
        }
    }

    async fn evict_once(&self) {
        let now = crate::now_millis();
        self.strikes.lock().await.retain(|s| now - s.time_ms <= EVICTION_HORIZON_MS);
    }

    async fn run_connection_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.connect_and_pump().await {
                tracing::warn!(collector = "lightning", error = %err, "connection lost; reconnecting");
                self.store.set_meta("lightning", CollectorStatus::Degraded, 1, crate::now_millis()).await;
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn run_persist_timer(&self) {
        let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.persist_once().await,
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn run_evict_timer(&self) {
        let mut ticker = tokio::time::interval(EVICT_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.evict_once().await,
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

pub struct LightningCollector {
    shared: LightningShared,
}

impl LightningCollector {
    pub fn new(endpoint: String, store: Arc<dyn Store>) -> Self {
        Self {
            shared: LightningShared {
                endpoint: endpoint.into(),
                store,
                strikes: Arc::new(Mutex::new(Vec::new())),
                cancel: CancellationToken::new(),
            },
        }
    }
}

#[async_trait]
impl StreamingCollector for LightningCollector {
    fn name(&self) -> &str {
        "lightning"
    }

    async fn start(&self) {
        let connection = self.shared.clone();
        tokio::spawn(async move { connection.run_connection_loop().await });

        let persist = self.shared.clone();
        tokio::spawn(async move { persist.run_persist_timer().await });

        let evict = self.shared.clone();
        tokio::spawn(async move { evict.run_evict_timer().await });
    }

    async fn stop(&self) {
        self.shared.cancel.cancel();
    }
}
