mod collector;
mod config;
mod error;
mod fetch;
mod grid;
mod health;
mod meta;
mod scheduler;
mod store;
mod streaming;

use collector::{MultiKeyRuntime, PeriodicJob, SingleKeyRuntime};
use config::{Config, StoreMode};
use eyre::{eyre, Result};
use health::HealthServer;
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use store::{DirectStore, RemoteStore, Store};
use streaming::StreamingCollector;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn now_utc() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Cadence table (§4.9: "registers the corresponding collector with its
/// cadence from a central table"). Interval is deliberately shorter than
/// each collector's own TTL so a snapshot never goes stale between runs.
fn register_periodic_collectors(scheduler: &Scheduler, cfg: &Config, client: reqwest::Client) {
    let table: Vec<(&str, Arc<dyn PeriodicJob>, Duration)> = vec![
        (
            "seismic",
            Arc::new(MultiKeyRuntime::new(Box::new(collector::usgs::UsgsCollector::standard(client.clone())))),
            Duration::from_secs(60),
        ),
        (
            "fogos",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::fogos::FogosCollector::new(client.clone())))),
            Duration::from_secs(60),
        ),
        (
            "gdacs",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::gdacs::GdacsCollector::new(client.clone())))),
            Duration::from_secs(300),
        ),
        (
            "ipma",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::ipma::IpmaCollector::new(client.clone())))),
            Duration::from_secs(600),
        ),
        (
            "kiwisdr",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::kiwisdr::KiwiSdrCollector::new(client.clone())))),
            Duration::from_secs(300),
        ),
        (
            "spaceweather",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::spaceweather::SpaceWeatherCollector::new(
                client.clone(),
            )))),
            Duration::from_secs(600),
        ),
        (
            "tec",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::ionosphere::TecCollector::new(client.clone())))),
            Duration::from_secs(900),
        ),
        (
            "aurora",
            Arc::new(SingleKeyRuntime::new(Box::new(collector::ionosphere::AuroraCollector::new(client.clone())))),
            Duration::from_secs(900),
        ),
        (
            "gfs",
            Arc::new(MultiKeyRuntime::new(Box::new(collector::gfs::GfsCollector::new(client.clone())))),
            Duration::from_secs(3600),
        ),
    ];

    for (name, job, interval) in table {
        if cfg.is_disabled(name) {
            tracing::info!(collector = name, "disabled via config; not registering");
            continue;
        }
        scheduler.register(job, interval);
    }
}

fn register_streaming_collectors(scheduler: &Scheduler, cfg: &Config, store: Arc<dyn Store>) {
    let entries: Vec<(&str, Arc<dyn StreamingCollector>)> = vec![
        (
            "aprs",
            Arc::new(streaming::aprs::AprsCollector::new(
                vec!["rotate.aprs.net:14580".to_string()],
                "KAOS-RO".to_string(),
                store.clone(),
            )),
        ),
        (
            "lightning",
            Arc::new(streaming::lightning::LightningCollector::new(
                "wss://data.blitzortung.org/strikes".to_string(),
                store.clone(),
            )),
        ),
    ];

    for (name, collector) in entries {
        if cfg.is_disabled(name) {
            tracing::info!(collector = name, "disabled via config; not registering");
            continue;
        }
        scheduler.register_streaming(collector);
    }
}

fn build_store(cfg: &Config) -> Result<Arc<dyn Store>> {
    match cfg.store_mode {
        StoreMode::Remote => {
            let url = cfg.store_url.clone().ok_or_else(|| eyre!("STORE_URL missing after validation"))?;
            Ok(Arc::new(RemoteStore::new(url, cfg.store_token.clone())))
        }
        StoreMode::Direct => {
            let dsn = cfg.store_dsn.clone().ok_or_else(|| eyre!("STORE_DSN missing after validation"))?;
            Ok(Arc::new(DirectStore::new(dsn)))
        }
    }
}

/// Hard shutdown deadline (§5): anything still running past this is
/// abandoned rather than let shutdown hang indefinitely.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cfg.log_level))
        .init();

    tracing::info!(
        store_mode = ?cfg.store_mode,
        health_port = cfg.health_port,
        disabled = ?cfg.disabled,
        "kaos-collector starting"
    );

    let store = build_store(&cfg)?;

    let client = reqwest::Client::builder()
        .timeout(cfg.fetch_timeout)
        .build()
        .map_err(|e| eyre!("failed to build HTTP client: {e}"))?;

    let scheduler = Arc::new(Scheduler::new(store.clone()));
    register_periodic_collectors(&scheduler, &cfg, client);
    register_streaming_collectors(&scheduler, &cfg, store.clone());

    let health = HealthServer::new(store.clone(), scheduler.clone(), cfg.health_port);
    health.start().await.map_err(|e| eyre!("failed to start health endpoint: {e}"))?;

    scheduler.start().await;

    wait_for_termination().await;
    tracing::info!("shutdown signal received; draining");

    let drain = async {
        scheduler.stop().await;
        health.stop().await;
        store.close().await;
    };

    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        tracing::warn!("shutdown deadline exceeded; abandoning in-flight work");
    }

    tracing::info!("kaos-collector stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
