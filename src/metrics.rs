//! Process-wide request counters.
//!
//! One [`Metrics`] value is created at startup and shared with the
//! middleware that updates it. Counters are independent and use `Relaxed`
//! ordering; a snapshot may be slightly skewed between fields.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live task count is sampled once every this many requests.
pub const TASK_SAMPLE_INTERVAL: u64 = 100;

#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    errors: AtomicU64,
    panics: AtomicU64,
    task_samples: AtomicU64,
    alive_tasks: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub panics: u64,
    pub task_samples: u64,
    /// Runtime task count at the most recent sample.
    pub alive_tasks: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a completed request and return the new total.
    ///
    /// Every [`TASK_SAMPLE_INTERVAL`]th request also samples the runtime's
    /// live task count.
    pub fn add_request(&self) -> u64 {
        let total = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if total % TASK_SAMPLE_INTERVAL == 0 {
            self.sample_tasks();
        }
        total
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    fn sample_tasks(&self) {
        self.task_samples.fetch_add(1, Ordering::Relaxed);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let alive = handle.metrics().num_alive_tasks() as u64;
            self.alive_tasks.store(alive, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            task_samples: self.task_samples.load(Ordering::Relaxed),
            alive_tasks: self.alive_tasks.load(Ordering::Relaxed),
        }
    }
}
