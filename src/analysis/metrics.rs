//! Pipeline counters.
//!
//! Constructed once by the server and handed to the API and the worker pool.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    jobs_submitted: AtomicU64,
    jobs_deduplicated: AtomicU64,
    attempts_started: AtomicU64,
    jobs_finished: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    poll_timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_deduplicated: u64,
    pub attempts_started: u64,
    pub jobs_finished: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub poll_timeouts: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self, deduplicated: bool) {
        if deduplicated {
            self.jobs_deduplicated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_attempt(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self) {
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_timeout(&self) {
        self.poll_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_deduplicated: self.jobs_deduplicated.load(Ordering::Relaxed),
            attempts_started: self.attempts_started.load(Ordering::Relaxed),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
        }
    }
}
