//! Producer-side handle to the durable job queue.

use std::future::Future;
use std::pin::Pin;

use jobs_core::{DEFAULT_QUEUE, Job, JobId, JobKind, RetryPolicy};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::repositories::JobRepository;
use crate::{Database, DbError};

/// Enqueue failures surfaced to producers.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("broker unavailable: {0}")]
    Broker(#[from] DbError),
    #[error("payload is not serializable: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Future returned by [`JobSink`] operations.
pub type EnqueueFuture = Pin<Box<dyn Future<Output = Result<JobId, EnqueueError>> + Send>>;

/// Anything producers can push jobs into.
///
/// [`QueueClient`] is the production implementation; producers only depend
/// on this trait.
pub trait JobSink: Send + Sync + 'static {
    /// Enqueue `payload` under `name`. With a key, an active job carrying the
    /// same key is reused instead of creating a new one.
    fn push(&self, name: String, payload: Value, idempotency_key: Option<String>)
    -> EnqueueFuture;
}

/// Handle used by producers to add jobs to one named queue.
///
/// It holds no dequeue operations; workers go through
/// [`JobRepository`] instead.
#[derive(Debug, Clone)]
pub struct QueueClient {
    jobs: JobRepository,
    queue: String,
    max_attempts: u32,
}

impl QueueClient {
    /// Create a client for the default `tasks` queue.
    pub fn new(db: Database) -> Self {
        Self {
            jobs: JobRepository::new(db),
            queue: DEFAULT_QUEUE.to_string(),
            max_attempts: RetryPolicy::default().max_attempts,
        }
    }

    /// Target a different queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Delivery budget stamped on every new job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Enqueue a job and return its id without waiting for it to run.
    ///
    /// `name` is not checked against the known job kinds so newer producers
    /// can run ahead of workers.
    pub async fn enqueue<P>(&self, name: &str, payload: &P) -> Result<JobId, EnqueueError>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        self.insert(name, payload, None).await
    }

    /// Enqueue unless an active job with the same idempotency key exists.
    pub async fn enqueue_unique<P>(
        &self,
        name: &str,
        payload: &P,
        idempotency_key: &str,
    ) -> Result<JobId, EnqueueError>
    where
        P: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload)?;
        self.insert(name, payload, Some(idempotency_key.to_string()))
            .await
    }

    /// Enqueue a typed job, deduplicated by its idempotency key when it has one.
    pub async fn enqueue_kind(&self, kind: &JobKind) -> Result<JobId, EnqueueError> {
        let payload = kind.payload()?;
        self.insert(kind.name(), payload, kind.idempotency_key())
            .await
    }

    async fn insert(
        &self,
        name: &str,
        payload: Value,
        idempotency_key: Option<String>,
    ) -> Result<JobId, EnqueueError> {
        if let Some(key) = &idempotency_key
            && let Some(existing) = self.jobs.find_active_by_key(&self.queue, key).await?
        {
            tracing::debug!(
                job_id = %existing.id,
                job_name = name,
                "Job with key {} already active, not enqueueing again",
                key
            );
            return Ok(existing.id);
        }

        let mut job =
            Job::new(&self.queue, name, payload).with_max_attempts(self.max_attempts);
        if let Some(key) = &idempotency_key {
            job = job.with_idempotency_key(key.clone());
        }

        match self.jobs.create(&job).await {
            Ok(created) => {
                tracing::debug!(job_id = %created.id, job_name = name, "Job enqueued");
                Ok(created.id)
            }
            Err(e) => {
                // A concurrent producer took the key slot between our lookup
                // and the insert; the unique index rejected ours.
                if let Some(key) = &idempotency_key
                    && let Some(existing) = self.jobs.find_active_by_key(&self.queue, key).await?
                {
                    tracing::debug!(
                        job_id = %existing.id,
                        job_name = name,
                        "Lost enqueue race for key {}, reusing active job",
                        key
                    );
                    return Ok(existing.id);
                }
                Err(e.into())
            }
        }
    }
}

impl JobSink for QueueClient {
    fn push(
        &self,
        name: String,
        payload: Value,
        idempotency_key: Option<String>,
    ) -> EnqueueFuture {
        let client = self.clone();
        Box::pin(async move { client.insert(&name, payload, idempotency_key).await })
    }
}
