//! Collector base (C4) and the concrete periodic collectors (C5/C6).
//!
//! Two capabilities, not a deep inheritance hierarchy, per §9's design
//! note: `Collector` publishes one key per run; `MultiKeyCollector`
//! publishes several, isolating failures per sub-key. Both share the
//! same retry-then-report shape from `keeper-rs::collector::collect_due`
//! (attempt budget, exponential delay, atomic counters for the run's
//! outcome) generalized from "N subscriptions checked per run" to "1
//! collect() attempt, retried".

pub mod fogos;
pub mod gdacs;
pub mod gfs;
pub mod ionosphere;
pub mod ipma;
pub mod kiwisdr;
pub mod spaceweather;
pub mod usgs;

use crate::error::CollectorError;
use crate::meta::CollectorStatus;
use crate::store::Store;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    fn key(&self) -> &str;
    fn ttl(&self) -> Duration;
    fn retry_attempts(&self) -> u32 {
        0
    }
    fn retry_delay(&self) -> Duration {
        Duration::from_secs(1)
    }
    async fn collect(&self) -> Result<Value, CollectorError>;
}

/// A single sub-publish inside a multi-key run.
pub struct MultiKeyPublisher<'a> {
    store: &'a dyn Store,
    collector_name: &'a str,
    published: AtomicU32,
}

impl<'a> MultiKeyPublisher<'a> {
    fn new(store: &'a dyn Store, collector_name: &'a str) -> Self {
        Self {
            store,
            collector_name,
            published: AtomicU32::new(0),
        }
    }

    /// Publish one sub-key. Failure here never aborts siblings (§4.3);
    /// it is logged and folded into the overall run's success only in
    /// that it does not count toward `published`.
    pub async fn put_to(&self, key: &str, value: &Value, ttl: Duration) {
        match self.store.put(key, value, ttl).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!(
                    collector = self.collector_name,
                    key,
                    error = %err,
                    "sub-publish failed; continuing with remaining keys"
                );
            }
        }
    }

    pub fn published_count(&self) -> u32 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
pub trait MultiKeyCollector: Send + Sync {
    fn name(&self) -> &str;
    fn retry_attempts(&self) -> u32 {
        0
    }
    fn retry_delay(&self) -> Duration {
        Duration::from_secs(1)
    }
    /// Implementations call `publisher.put_to(...)` for each sub-key.
    /// Returning `Err` fails the whole run for retry/backoff purposes;
    /// implementations should only do this when the upstream fetch itself
    /// failed before any sub-key could be derived.
    async fn collect_multi(&self, publisher: &MultiKeyPublisher<'_>) -> Result<(), CollectorError>;
}

/// Gate used by both runtimes to implement the §3/§8 single-flight
/// invariant: at most one `collect()` in flight per collector at a time.
struct RunGate {
    is_running: AtomicBool,
    consecutive_errors: AtomicU32,
}

impl RunGate {
    fn new() -> Self {
        Self {
            is_running: AtomicBool::new(false),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    fn try_acquire(&self) -> bool {
        !self.is_running.swap(true, Ordering::SeqCst)
    }

    fn release(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn note_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    fn note_failure(&self) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A runnable periodic job as seen by the scheduler: either a single-key
/// or multi-key collector, wrapped with its run gate. Kept object-safe so
/// the scheduler can hold heterogeneous collectors in one `Vec`.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;
    fn is_running(&self) -> bool;
    /// Runs the collector once, including its internal retry budget, and
    /// reports the outcome to the store's metadata. Never panics or
    /// propagates collector errors to the caller (§7).
    ///
    /// `dispatched_at_ms` is the scheduler's dispatch timestamp, recorded
    /// before this job was handed to `tokio::spawn`; it is threaded through
    /// to `Store::set_meta` so the persisted `last-run` key reflects
    /// dispatch time rather than whenever this call happens to finish.
    async fn run(&self, store: &dyn Store, dispatched_at_ms: i64);
}

pub struct SingleKeyRuntime {
    collector: Box<dyn Collector>,
    gate: RunGate,
}

impl SingleKeyRuntime {
    pub fn new(collector: Box<dyn Collector>) -> Self {
        Self {
            collector,
            gate: RunGate::new(),
        }
    }
}

#[async_trait]
impl PeriodicJob for SingleKeyRuntime {
    fn name(&self) -> &str {
        self.collector.name()
    }

    fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    async fn run(&self, store: &dyn Store, dispatched_at_ms: i64) {
        if !self.gate.try_acquire() {
            tracing::info!(collector = self.collector.name(), "already running; skipping");
            return;
        }

        let outcome = collect_with_retry(
            self.collector.retry_attempts(),
            self.collector.retry_delay(),
            || self.collector.collect(),
        )
        .await;

        match outcome {
            Ok(value) => match store.put(self.collector.key(), &value, self.collector.ttl()).await {
                Ok(()) => {
                    self.gate.note_success();
                    store.set_meta(self.collector.name(), CollectorStatus::Ok, 0, dispatched_at_ms).await;
                }
                Err(err) => {
                    let n = self.gate.note_failure();
                    tracing::error!(collector = self.collector.name(), error = %err, "put failed");
                    store
                        .set_meta(self.collector.name(), CollectorStatus::from_consecutive_errors(n), n, dispatched_at_ms)
                        .await;
                }
            },
            Err(CollectorError::Cancelled) => {
                tracing::debug!(collector = self.collector.name(), "run cancelled");
            }
            Err(err) => {
                let n = self.gate.note_failure();
                tracing::error!(collector = self.collector.name(), error = %err, "collect failed");
                store
                    .set_meta(self.collector.name(), CollectorStatus::from_consecutive_errors(n), n, dispatched_at_ms)
                    .await;
            }
        }

        self.gate.release();
    }
}

pub struct MultiKeyRuntime {
    collector: Box<dyn MultiKeyCollector>,
    gate: RunGate,
}

impl MultiKeyRuntime {
    pub fn new(collector: Box<dyn MultiKeyCollector>) -> Self {
        Self {
            collector,
            gate: RunGate::new(),
        }
    }
}

#[async_trait]
impl PeriodicJob for MultiKeyRuntime {
    fn name(&self) -> &str {
        self.collector.name()
    }

    fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    async fn run(&self, store: &dyn Store, dispatched_at_ms: i64) {
        if !self.gate.try_acquire() {
            tracing::info!(collector = self.collector.name(), "already running; skipping");
            return;
        }

        let name = self.collector.name().to_string();
        let outcome = collect_with_retry(self.collector.retry_attempts(), self.collector.retry_delay(), || async {
            let publisher = MultiKeyPublisher::new(store, &name);
            self.collector.collect_multi(&publisher).await?;
            Ok(publisher.published_count())
        })
        .await;

        match outcome {
            Ok(published) => {
                self.gate.note_success();
                tracing::info!(collector = %name, published, "multi-key run complete");
                store.set_meta(&name, CollectorStatus::Ok, 0, dispatched_at_ms).await;
            }
            Err(CollectorError::Cancelled) => {
                tracing::debug!(collector = %name, "run cancelled");
            }
            Err(err) => {
                let n = self.gate.note_failure();
                tracing::error!(collector = %name, error = %err, "multi-key collect failed after retries");
                store
                    .set_meta(&name, CollectorStatus::from_consecutive_errors(n), n, dispatched_at_ms)
                    .await;
            }
        }

        self.gate.release();
    }
}

/// Shared retry loop: `attempts = retry_attempts + 1`, delay doubled on
/// each failure (§4.3 step 3).
async fn collect_with_retry<T, F, Fut>(
    retry_attempts: u32,
    mut delay: Duration,
    mut f: F,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CollectorError>>,
{
    let attempts = retry_attempts + 1;
    let mut last_err = None;

    for attempt in 1..=attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < attempts {
                    tracing::warn!(attempt, error = %err, "collect attempt failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.expect("at least one attempt runs"))
}
