//! Scheduler (C8, §4.7): owns the registration table for periodic and
//! streaming collectors and drives periodic ones from a 1-second check
//! loop. Dispatch time, not completion time, is what advances a job's
//! `last_run` — a slow collector does not retroactively look "on time"
//! once it finally returns (§4.7, §8 scenario 6).

use crate::collector::PeriodicJob;
use crate::store::Store;
use crate::streaming::StreamingCollector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

struct RegisteredJob {
    name: String,
    job: Arc<dyn PeriodicJob>,
    interval: Duration,
    last_run_ms: Arc<AtomicI64>,
}

#[derive(Debug, Serialize)]
pub struct JobStatus {
    pub last_run: i64,
    pub is_running: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: BTreeMap<String, JobStatus>,
    pub streaming: Vec<String>,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    /// Insertion-ordered, not a map: §4.7 requires same-tick ties to
    /// dispatch in insertion order, which a name-keyed `BTreeMap` cannot
    /// preserve.
    jobs: Mutex<Vec<RegisteredJob>>,
    streaming: Mutex<BTreeMap<String, Arc<dyn StreamingCollector>>>,
    cancel: CancellationToken,
    running: AtomicBool,
    check_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_check_interval(store, CHECK_INTERVAL)
    }

    fn with_check_interval(store: Arc<dyn Store>, check_interval: Duration) -> Self {
        Self {
            store,
            jobs: Mutex::new(Vec::new()),
            streaming: Mutex::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            check_interval,
        }
    }

    /// Registers (or replaces, by name, keeping its original position) a
    /// periodic job. Synchronous: the caller is expected to finish
    /// building the registration table before calling `start()`.
    pub fn register(&self, job: Arc<dyn PeriodicJob>, interval: Duration) {
        let name = job.name().to_string();
        let entry = RegisteredJob { name: name.clone(), job, interval, last_run_ms: Arc::new(AtomicI64::new(0)) };
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter().position(|j| j.name == name) {
            Some(idx) => jobs[idx] = entry,
            None => jobs.push(entry),
        }
    }

    pub fn register_streaming(&self, collector: Arc<dyn StreamingCollector>) {
        let name = collector.name().to_string();
        self.streaming.lock().unwrap().insert(name, collector);
    }

    fn dispatch(&self, name: &str) {
        let (job, store, dispatched_at_ms) = {
            let jobs = self.jobs.lock().unwrap();
            let Some(entry) = jobs.iter().find(|j| j.name == name) else { return };
            let dispatched_at_ms = crate::now_millis();
            entry.last_run_ms.store(dispatched_at_ms, Ordering::SeqCst);
            (entry.job.clone(), self.store.clone(), dispatched_at_ms)
        };
        tokio::spawn(async move {
            job.run(store.as_ref(), dispatched_at_ms).await;
        });
    }

    /// Due jobs in insertion order (§4.7 same-tick tie-break).
    fn check_once(&self) {
        let now = crate::now_millis();
        let due: Vec<String> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .filter(|entry| {
                    let last = entry.last_run_ms.load(Ordering::SeqCst);
                    now.saturating_sub(last) >= entry.interval.as_millis() as i64 && !entry.job.is_running()
                })
                .map(|entry| entry.name.clone())
                .collect()
        };
        for name in due {
            self.dispatch(&name);
        }
    }

    async fn run_check_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_once(),
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Starts every streaming collector, fires every registered periodic
    /// job once, then starts the check loop. Does not return until every
    /// periodic job's `last_run` has been recorded — callers can rely on
    /// `status()` reflecting a dispatched first run immediately after.
    pub async fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let streaming: Vec<Arc<dyn StreamingCollector>> =
            self.streaming.lock().unwrap().values().cloned().collect();
        for collector in streaming {
            collector.start().await;
        }

        let names: Vec<String> = self.jobs.lock().unwrap().iter().map(|j| j.name.clone()).collect();
        for name in &names {
            self.dispatch(name);
        }

        let loop_handle = self.clone();
        tokio::spawn(async move { loop_handle.run_check_loop().await });
    }

    /// Cancels the check loop and stops streaming collectors. Does not wait
    /// for, or interrupt, any periodic job already in flight (§4.7).
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let streaming: Vec<Arc<dyn StreamingCollector>> =
            self.streaming.lock().unwrap().values().cloned().collect();
        for collector in streaming {
            collector.stop().await;
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|entry| {
                (
                    entry.name.clone(),
                    JobStatus {
                        last_run: entry.last_run_ms.load(Ordering::SeqCst),
                        is_running: entry.job.is_running(),
                        interval_secs: entry.interval.as_secs(),
                    },
                )
            })
            .collect();
        let streaming = self.streaming.lock().unwrap().keys().cloned().collect();
        SchedulerStatus { running: self.running.load(Ordering::SeqCst), jobs, streaming }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::FakeStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct SlowJob {
        dispatches: Arc<AtomicU32>,
        running: Arc<AtomicBool>,
        duration: Duration,
    }

    #[async_trait]
    impl PeriodicJob for SlowJob {
        fn name(&self) -> &str {
            "slow"
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn run(&self, _store: &dyn Store, _dispatched_at_ms: i64) {
            self.running.store(true, Ordering::SeqCst);
            self.dispatches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.running.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn scenario_dispatch_timing_skips_while_running() {
        // §8 scenario 6, scaled 1:25 (check 40ms, interval 200ms, job 480ms,
        // window 1.2s) so the test runs in well under two seconds while
        // preserving the ratios: exactly 3 dispatches, at t ~= 0, 200, 400.
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let scheduler = Arc::new(Scheduler::with_check_interval(store, Duration::from_millis(40)));

        let dispatches = Arc::new(AtomicU32::new(0));
        let running = Arc::new(AtomicBool::new(false));
        let job = Arc::new(SlowJob {
            dispatches: dispatches.clone(),
            running: running.clone(),
            duration: Duration::from_millis(480),
        });
        scheduler.register(job, Duration::from_millis(200));

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(1200)).await;
        scheduler.stop().await;

        assert_eq!(dispatches.load(Ordering::SeqCst), 3);
    }

    struct InstantJob {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PeriodicJob for InstantJob {
        fn name(&self) -> &str {
            "instant"
        }
        fn is_running(&self) -> bool {
            false
        }
        async fn run(&self, _store: &dyn Store, _dispatched_at_ms: i64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_fires_every_job_once_before_returning() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let scheduler = Arc::new(Scheduler::new(store));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register(Arc::new(InstantJob { calls: calls.clone() }), Duration::from_secs(3600));

        scheduler.start().await;
        let status = scheduler.status();
        scheduler.stop().await;

        assert_ne!(status.jobs["instant"].last_run, 0);
    }

    struct OrderRecordingJob {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl PeriodicJob for OrderRecordingJob {
        fn name(&self) -> &str {
            self.name
        }
        fn is_running(&self) -> bool {
            false
        }
        async fn run(&self, _store: &dyn Store, _dispatched_at_ms: i64) {
            self.order.lock().unwrap().push(self.name);
        }
    }

    #[tokio::test]
    async fn same_tick_ties_dispatch_in_insertion_order() {
        // §4.7: "if two jobs come due in the same tick, dispatch order is
        // insertion order."
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let scheduler = Arc::new(Scheduler::with_check_interval(store, Duration::from_millis(1_000_000)));
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.register(Arc::new(OrderRecordingJob { name: "zebra", order: order.clone() }), Duration::from_secs(60));
        scheduler.register(Arc::new(OrderRecordingJob { name: "apple", order: order.clone() }), Duration::from_secs(60));
        scheduler.register(Arc::new(OrderRecordingJob { name: "mango", order: order.clone() }), Duration::from_secs(60));

        scheduler.start().await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.stop().await;

        assert_eq!(*order.lock().unwrap(), vec!["zebra", "apple", "mango"]);
    }

    #[tokio::test]
    async fn register_replaces_by_name() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let scheduler = Scheduler::new(store);
        let calls_a = Arc::new(AtomicU32::new(0));
        let calls_b = Arc::new(AtomicU32::new(0));
        scheduler.register(Arc::new(InstantJob { calls: calls_a }), Duration::from_secs(1));
        scheduler.register(Arc::new(InstantJob { calls: calls_b }), Duration::from_secs(2));

        assert_eq!(scheduler.status().jobs.len(), 1);
        assert_eq!(scheduler.status().jobs["instant"].interval_secs, 2);
    }
}
