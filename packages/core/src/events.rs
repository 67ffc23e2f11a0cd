//! Job lifecycle events for observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobState};

/// Events emitted by the worker pool as jobs move through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A worker claimed a job and invoked its handler.
    JobStarted {
        job_id: JobId,
        job_name: String,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A handler returned normally.
    JobCompleted {
        job_id: JobId,
        job_name: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A handler failed or the job could not be dispatched.
    JobFailed {
        job_id: JobId,
        job_name: String,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// An expired in-flight claim was released by the housekeeping sweep.
    JobLeaseExpired {
        job_id: JobId,
        new_state: JobState,
        timestamp: DateTime<Utc>,
    },
    /// A worker joined the pool.
    WorkerConnected {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker left the pool.
    WorkerDisconnected {
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobLeaseExpired { job_id, .. } => Some(*job_id),
            JobEvent::WorkerConnected { .. } | JobEvent::WorkerDisconnected { .. } => None,
        }
    }

    /// True when the job will not be delivered again.
    pub fn is_final(&self) -> bool {
        match self {
            JobEvent::JobCompleted { .. } => true,
            JobEvent::JobFailed { will_retry, .. } => !will_retry,
            JobEvent::JobLeaseExpired { new_state, .. } => new_state.is_terminal(),
            _ => false,
        }
    }
}
