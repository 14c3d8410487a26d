//! Health endpoint (C9, §4.8): a minimal `/health` surface for the
//! supervisor's own liveness probe, not for public consumption — no auth,
//! binds loopback-only by default.

use crate::scheduler::Scheduler;
use crate::store::Store;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Consecutive failed pings before `/health` starts reporting 503 (§4.8).
const UNHEALTHY_THRESHOLD: u32 = 2;

#[derive(Serialize)]
struct HealthBody {
    uptime_seconds: u64,
    redis_ok: bool,
    scheduler: crate::scheduler::SchedulerStatus,
}

struct HealthState {
    store: Arc<dyn Store>,
    scheduler: Arc<Scheduler>,
    started_at: Instant,
    consecutive_failed_pings: AtomicU32,
}

pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
    cancel: CancellationToken,
}

impl HealthServer {
    pub fn new(store: Arc<dyn Store>, scheduler: Arc<Scheduler>, port: u16) -> Self {
        Self {
            state: Arc::new(HealthState {
                store,
                scheduler,
                started_at: Instant::now(),
                consecutive_failed_pings: AtomicU32::new(0),
            }),
            port,
            cancel: CancellationToken::new(),
        }
    }

    /// Binds loopback-only and serves until `stop()` is called.
    pub async fn start(&self) -> Result<(), std::io::Error> {
        let app = Router::new().route("/health", get(health_handler)).with_state(self.state.clone());
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "health endpoint listening");

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .ok();
        });
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let ok = state.store.ping().await;
    let failed = if ok {
        state.consecutive_failed_pings.store(0, Ordering::SeqCst);
        0
    } else {
        state.consecutive_failed_pings.fetch_add(1, Ordering::SeqCst) + 1
    };

    let body = HealthBody {
        uptime_seconds: state.started_at.elapsed().as_secs(),
        redis_ok: ok,
        scheduler: state.scheduler.status(),
    };

    let status = if failed >= UNHEALTHY_THRESHOLD { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::FakeStore;

    #[tokio::test]
    async fn reports_503_after_two_consecutive_failed_pings() {
        let store = Arc::new(FakeStore::default());
        store.ping_ok.store(false, Ordering::SeqCst);
        let scheduler = Arc::new(Scheduler::new(store.clone()));
        let state = Arc::new(HealthState {
            store,
            scheduler,
            started_at: Instant::now(),
            consecutive_failed_pings: AtomicU32::new(0),
        });

        let (status1, _) = health_handler(State(state.clone())).await.into_response().into_parts();
        assert_eq!(status1.status, StatusCode::OK);
        let (status2, _) = health_handler(State(state.clone())).await.into_response().into_parts();
        assert_eq!(status2.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn successful_ping_resets_the_failure_streak() {
        let store = Arc::new(FakeStore::default());
        let scheduler = Arc::new(Scheduler::new(store.clone()));
        store.ping_ok.store(false, Ordering::SeqCst);
        let state = Arc::new(HealthState {
            store: store.clone(),
            scheduler,
            started_at: Instant::now(),
            consecutive_failed_pings: AtomicU32::new(0),
        });

        health_handler(State(state.clone())).await;
        store.ping_ok.store(true, Ordering::SeqCst);
        let (status, _) = health_handler(State(state.clone())).await.into_response().into_parts();
        assert_eq!(status.status, StatusCode::OK);
    }
}
