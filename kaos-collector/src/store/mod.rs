//! Store client (C1): atomic snapshot writes with TTL, best-effort metadata,
//! and a uniform capability over two back-ends (remote HTTP, direct TCP).
//! The rest of the system holds an `Arc<dyn Store>` and never branches on
//! which backend is active, per §4.1.

mod direct;
mod remote;

pub use direct::DirectStore;
pub use remote::RemoteStore;

use crate::error::CollectorError;
use crate::meta::{error_count_key, last_run_key, status_key, CollectorStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait Store: Send + Sync {
    /// Serialize `value` and set key + TTL together in a single write, so a
    /// reader never observes a partially-written snapshot (§3 invariant).
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CollectorError>;

    /// Returns `None` on expiry or absence.
    async fn get(&self, key: &str) -> Result<Option<Value>, CollectorError>;

    /// Three writes, no TTL. Best-effort: never propagates failure to the
    /// caller (§4.1, §7) — a failing write is logged and dropped.
    ///
    /// `last_run_ms` is supplied by the caller rather than read from the
    /// clock here, so that the persisted `last-run` key always agrees with
    /// whatever moment the rest of the system considers "when this run
    /// happened" (the scheduler's dispatch time), instead of silently
    /// drifting to this method's own completion time.
    async fn set_meta(&self, name: &str, status: CollectorStatus, error_count: u32, last_run_ms: i64) {
        for (key, value) in [
            (status_key(name), Value::String(status.to_string())),
            (last_run_key(name), Value::from(last_run_ms)),
            (error_count_key(name), Value::from(error_count)),
        ] {
            if let Err(err) = self.put_meta_raw(&key, &value).await {
                tracing::warn!(collector = name, key = %key, error = %err, "set_meta write failed; swallowing");
            }
        }
    }

    /// Backend-specific no-TTL write used by the default `set_meta` above.
    async fn put_meta_raw(&self, key: &str, value: &Value) -> Result<(), CollectorError>;

    async fn ping(&self) -> bool;

    /// Introspection only; never called from collector code paths.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CollectorError>;

    /// Drains any in-flight writes and releases backend resources. Default
    /// no-op; `DirectStore` overrides it to drop its shared connection.
    async fn close(&self) {}
}
