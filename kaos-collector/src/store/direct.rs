//! Direct TCP store backend for local development (§4.1: "a direct TCP
//! connection for local development"). Speaks a minimal Redis-flavored line
//! protocol: `SET key ttl_secs <json>`, `GET key`, `PING`, `KEYS prefix`,
//! one request per line, one reply per line. The connection is shared and
//! serialized behind a `tokio::sync::Mutex`, mirroring how `keeper-rs`
//! guards its single state file with a lock.

use super::Store;
use crate::error::CollectorError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub struct DirectStore {
    dsn: String,
    conn: Mutex<Option<BufReader<TcpStream>>>,
}

impl DirectStore {
    pub fn new(dsn: String) -> Self {
        Self {
            dsn,
            conn: Mutex::new(None),
        }
    }

    async fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut BufReader<TcpStream>) -> futures::future::BoxFuture<'_, Result<T, CollectorError>>,
    ) -> Result<T, CollectorError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.dsn).await.map_err(|e| {
                CollectorError::TransientNetwork(format!("connect {}: {e}", self.dsn))
            })?;
            *guard = Some(BufReader::new(stream));
        }
        let conn = guard.as_mut().expect("just populated");
        match f(conn).await {
            Ok(v) => Ok(v),
            Err(e) => {
                // Drop the connection so the next call reconnects.
                *guard = None;
                Err(e)
            }
        }
    }

    async fn send_line(conn: &mut BufReader<TcpStream>, line: &str) -> Result<String, CollectorError> {
        conn.get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?;
        conn.get_mut()
            .write_all(b"\n")
            .await
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?;
        let mut reply = String::new();
        conn.read_line(&mut reply)
            .await
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?;
        Ok(reply.trim_end().to_string())
    }
}

#[async_trait]
impl Store for DirectStore {
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CollectorError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| CollectorError::StoreError(format!("serialize failed: {e}")))?;
        let key = key.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                // Atomic SET + EX in one line; the direct backend supports
                // the combined form (§9 open question: resolved here in
                // favor of a single write, matching §4.1's "single
                // conditional write that sets the key and TTL together").
                let line = format!("SET {key} {} {payload}", ttl.as_secs());
                let reply = Self::send_line(conn, &line).await?;
                if reply != "OK" {
                    return Err(CollectorError::StoreError(format!("unexpected reply: {reply}")));
                }
                Ok(())
            })
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CollectorError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let line = format!("GET {key}");
                let reply = Self::send_line(conn, &line).await?;
                if reply == "(nil)" {
                    return Ok(None);
                }
                let value: Value = serde_json::from_str(&reply)
                    .map_err(|e| CollectorError::DecodeError(e.to_string()))?;
                Ok(Some(value))
            })
        })
        .await
    }

    async fn put_meta_raw(&self, key: &str, value: &Value) -> Result<(), CollectorError> {
        self.put(key, value, Duration::from_secs(0)).await
    }

    async fn ping(&self) -> bool {
        let result: Result<String, CollectorError> =
            self.with_conn(|conn| Box::pin(async move { Self::send_line(conn, "PING").await }))
                .await;
        matches!(result, Ok(r) if r == "PONG")
    }

    async fn close(&self) {
        *self.conn.lock().await = None;
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CollectorError> {
        let prefix = prefix.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let line = format!("KEYS {prefix}");
                let reply = Self::send_line(conn, &line).await?;
                if reply.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(reply.split(',').map(|s| s.to_string()).collect())
            })
        })
        .await
    }
}
