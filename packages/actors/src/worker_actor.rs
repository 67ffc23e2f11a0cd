//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use db::DbError;
use db::repositories::JobRepository;
use futures_util::FutureExt;
use jobs_core::{HandlerError, Job, JobEvent, JobId, QueueConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::handler::{HandlerResult, JobHandlers, dispatch};
use crate::messages::WorkerMessage;

/// What happened to one delivery, as recorded in the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Handler succeeded; the job is completed.
    Completed(Job),
    /// Handler failed; the job is rescheduled or dead.
    Failed { job: Job, will_retry: bool },
    /// The claim expired before the outcome was reported.
    LostClaim(JobId),
}

/// Claims jobs, runs their handlers and reports outcomes.
///
/// This is the whole worker behavior; [`WorkerActor`] only drives it.
#[derive(Clone)]
pub struct JobRunner {
    worker_id: String,
    jobs: JobRepository,
    handlers: Arc<dyn JobHandlers>,
    config: QueueConfig,
    event_tx: Option<broadcast::Sender<JobEvent>>,
}

impl JobRunner {
    pub fn new(
        worker_id: impl Into<String>,
        jobs: JobRepository,
        handlers: Arc<dyn JobHandlers>,
        config: QueueConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            jobs,
            handlers,
            config,
            event_tx: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<JobEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn broadcast(&self, event: JobEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Claim the next due job, if any.
    pub async fn claim(&self) -> Result<Option<Job>, DbError> {
        self.jobs
            .claim_next(&self.config.name, &self.worker_id, self.config.lease)
            .await
    }

    /// Claim and run one job. `None` when nothing is due.
    pub async fn process_next(&self) -> Result<Option<Delivery>, DbError> {
        match self.claim().await? {
            Some(job) => self.run(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run a claimed job and record the outcome.
    ///
    /// Handler errors and panics are turned into job failures; only broker
    /// errors are returned.
    pub async fn run(&self, job: Job) -> Result<Delivery, DbError> {
        tracing::info!(
            job_id = %job.id,
            job_name = %job.name,
            attempt = job.attempts,
            worker_id = %self.worker_id,
            "Processing job"
        );
        self.broadcast(JobEvent::JobStarted {
            job_id: job.id,
            job_name: job.name.clone(),
            worker_id: self.worker_id.clone(),
            attempt: job.attempts,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let result = self.invoke(&job).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(job_result) => {
                let Some(done) = self
                    .jobs
                    .complete(job.id, &self.worker_id, &job_result)
                    .await?
                else {
                    tracing::warn!(job_id = %job.id, "Claim lost before completion was recorded");
                    return Ok(Delivery::LostClaim(job.id));
                };

                tracing::info!(
                    job_id = %job.id,
                    job_name = %job.name,
                    duration_ms,
                    "Job completed: {}",
                    job_result.summary
                );
                self.broadcast(JobEvent::JobCompleted {
                    job_id: job.id,
                    job_name: job.name.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(Delivery::Completed(done))
            }
            Err(error) => {
                let Some(failed) = self
                    .jobs
                    .fail(&job, &self.worker_id, &error, &self.config.retry)
                    .await?
                else {
                    tracing::warn!(job_id = %job.id, "Claim lost before failure was recorded");
                    return Ok(Delivery::LostClaim(job.id));
                };

                let will_retry = !failed.state.is_terminal();
                tracing::warn!(
                    job_id = %job.id,
                    job_name = %job.name,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    will_retry,
                    "Job failed: {}",
                    error
                );
                self.broadcast(JobEvent::JobFailed {
                    job_id: job.id,
                    job_name: job.name.clone(),
                    error: error.to_string(),
                    attempts: job.attempts,
                    will_retry,
                    timestamp: Utc::now(),
                });
                Ok(Delivery::Failed {
                    job: failed,
                    will_retry,
                })
            }
        }
    }

    async fn invoke(&self, job: &Job) -> HandlerResult {
        let handlers = self.handlers.clone();
        let outcome = AssertUnwindSafe(async move { dispatch(handlers.as_ref(), job).await })
            .catch_unwind()
            .await;

        outcome.unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HandlerError::retryable(format!("handler panicked: {}", reason)))
        })
    }
}

/// State for the worker actor.
pub struct WorkerActorState {
    pub runner: JobRunner,
    /// Whether the worker should keep polling.
    pub running: bool,
}

/// Worker actor that executes jobs one at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = JobRunner;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        runner: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", runner.worker_id());
        runner.broadcast(JobEvent::WorkerConnected {
            worker_id: runner.worker_id().to_string(),
            timestamp: Utc::now(),
        });

        Ok(WorkerActorState {
            runner,
            running: true,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.runner.broadcast(JobEvent::WorkerDisconnected {
            worker_id: state.runner.worker_id().to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.running {
                    return Ok(());
                }

                // Claim and run in one message so a shutdown queued behind
                // this poll never finds a claimed job left unstarted.
                match state.runner.process_next().await {
                    Ok(Some(_)) => {
                        // Drain the queue before going back to timed polling.
                        myself.send_message(WorkerMessage::Poll)?;
                    }
                    Ok(None) => {
                        tracing::trace!("Worker {} found no due job", state.runner.worker_id());
                        let interval = state.runner.config.poll_interval;
                        myself.send_after(interval, || WorkerMessage::Poll);
                    }
                    Err(e) => {
                        // An unrecorded outcome is redelivered once its lease expires.
                        tracing::warn!(
                            "Worker {} failed to claim or record a job: {}",
                            state.runner.worker_id(),
                            e
                        );
                        let interval = state.runner.config.poll_interval;
                        myself.send_after(interval, || WorkerMessage::Poll);
                    }
                }
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.runner.worker_id());
                state.running = false;
                myself.stop(None);
            }
        }

        Ok(())
    }
}
