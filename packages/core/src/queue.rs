//! Queue-level configuration and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

/// The single queue every job in this system goes through.
pub const DEFAULT_QUEUE: &str = "tasks";

/// Configuration for a worker pool attached to one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Queue name.
    pub name: String,
    /// Number of concurrent workers.
    pub concurrency: u32,
    /// Delay between polls of an idle worker.
    pub poll_interval: Duration,
    /// How long a claim stays invisible to other workers.
    pub lease: Duration,
    /// How long terminal jobs are kept before purging.
    pub retention: Duration,
    /// Interval of the pool's housekeeping sweep.
    pub housekeeping_interval: Duration,
    /// Delivery budget and backoff for new and failed jobs.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE.to_string(),
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
            lease: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 60 * 60),
            housekeeping_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

/// Job counts per state for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub queued: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed_retryable: u64,
    pub failed_terminal: u64,
}

impl QueueStats {
    /// Jobs still awaiting a final outcome.
    pub fn active(&self) -> u64 {
        self.queued + self.in_flight + self.failed_retryable
    }

    /// Jobs with a final outcome.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed_terminal
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}
