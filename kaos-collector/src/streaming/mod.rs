//! Streaming collectors (C7): long-lived TCP/WebSocket clients that own an
//! in-memory working set, flushed to the store on their own timers rather
//! than driven by the scheduler's check loop.

pub mod aprs;
pub mod lightning;

use async_trait::async_trait;

/// Capability exposed to the scheduler for streaming collectors — distinct
/// from `PeriodicJob` per §9's "don't express a streaming client as a
/// periodic job with interval zero".
#[async_trait]
pub trait StreamingCollector: Send + Sync {
    fn name(&self) -> &str;
    /// Spawns the connect/decode/flush/evict tasks and returns immediately.
    async fn start(&self);
    /// Cancels the collector's tasks and closes its socket. Idempotent.
    async fn stop(&self);
}
