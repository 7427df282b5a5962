/// Lightweight worker metrics: job outcomes and pipeline volume, tracked in
/// process and flushed to the log on an interval.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;

static JOBS_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static JOBS_FAILED: AtomicU64 = AtomicU64::new(0);
static SURROGATES_ASSIGNED: AtomicU64 = AtomicU64::new(0);
static IDS_MATCHED: AtomicU64 = AtomicU64::new(0);

static STARTED_AT: Lazy<chrono::DateTime<chrono::Utc>> = Lazy::new(chrono::Utc::now);

pub fn record_job_success() {
    JOBS_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_job_failure() {
    JOBS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_surrogates_assigned(count: u64) {
    SURROGATES_ASSIGNED.fetch_add(count, Ordering::Relaxed);
}

pub fn record_ids_matched(count: u64) {
    IDS_MATCHED.fetch_add(count, Ordering::Relaxed);
}

pub fn reset() {
    JOBS_SUCCEEDED.store(0, Ordering::Relaxed);
    JOBS_FAILED.store(0, Ordering::Relaxed);
    SURROGATES_ASSIGNED.store(0, Ordering::Relaxed);
    IDS_MATCHED.store(0, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_utc: String,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub surrogates_assigned: u64,
    pub ids_matched: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        started_utc: STARTED_AT.to_rfc3339(),
        jobs_succeeded: JOBS_SUCCEEDED.load(Ordering::Relaxed),
        jobs_failed: JOBS_FAILED.load(Ordering::Relaxed),
        surrogates_assigned: SURROGATES_ASSIGNED.load(Ordering::Relaxed),
        ids_matched: IDS_MATCHED.load(Ordering::Relaxed),
    }
}

pub fn log_metrics() {
    let s = snapshot();
    log::info!(
        "Jobs: {} ok / {} failed | surrogates assigned: {} | IDs matched: {}",
        s.jobs_succeeded,
        s.jobs_failed,
        s.surrogates_assigned,
        s.ids_matched
    );
}

/// Periodic log gate for the poll loop.
pub struct MetricsTicker {
    last_log: Instant,
    interval: Duration,
}

impl MetricsTicker {
    pub fn new(interval: Duration) -> Self {
        Self { last_log: Instant::now(), interval }
    }

    pub fn log_if_ready(&mut self) {
        if self.last_log.elapsed() >= self.interval {
            self.last_log = Instant::now();
            log_metrics();
        }
    }
}
