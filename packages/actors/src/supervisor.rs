//! Supervisor actor owning the worker pool of one queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::Database;
use db::repositories::JobRepository;
use jobs_core::{JobEvent, JobId, QueueConfig};
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::handler::JobHandlers;
use crate::messages::{PoolMessage, WorkerMessage};
use crate::worker_actor::{JobRunner, WorkerActor};

/// Arguments for the pool supervisor.
pub struct PoolArgs {
    pub db: Database,
    pub handlers: Arc<dyn JobHandlers>,
    pub config: QueueConfig,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    jobs: JobRepository,
    handlers: Arc<dyn JobHandlers>,
    config: QueueConfig,
    event_tx: broadcast::Sender<JobEvent>,
    /// Live workers by actor id, with their worker ids.
    workers: HashMap<ActorId, (String, ActorRef<WorkerMessage>)>,
    /// Set once shutdown starts; stops restarts.
    stopping: bool,
}

impl SupervisorState {
    fn runner(&self, worker_id: &str) -> JobRunner {
        JobRunner::new(
            worker_id,
            self.jobs.clone(),
            self.handlers.clone(),
            self.config.clone(),
        )
        .with_event_tx(self.event_tx.clone())
    }
}

async fn spawn_worker(
    supervisor: ActorCell,
    state: &mut SupervisorState,
    worker_id: String,
) -> Result<(), ActorProcessingErr> {
    let runner = state.runner(&worker_id);
    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, runner, supervisor)
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.workers.insert(worker.get_id(), (worker_id, worker));
    Ok(())
}

/// Supervisor actor that keeps `concurrency` workers alive and runs
/// housekeeping for the queue.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = PoolMessage;
    type State = SupervisorState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting worker pool for queue '{}' with {} workers",
            args.config.name,
            args.config.concurrency
        );

        let mut state = SupervisorState {
            jobs: JobRepository::new(args.db),
            handlers: args.handlers,
            config: args.config,
            event_tx: args.event_tx,
            workers: HashMap::new(),
            stopping: false,
        };

        for n in 1..=state.config.concurrency {
            let worker_id = format!("{}-worker-{}", state.config.name, n);
            spawn_worker(myself.get_cell(), &mut state, worker_id).await?;
        }

        // Start periodic housekeeping
        let myself_clone = myself.clone();
        let period = state.config.housekeeping_interval;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                if myself_clone.send_message(PoolMessage::Housekeeping).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Housekeeping => {
                match state.jobs.recover_expired(&state.config.name).await {
                    Ok(recovered) => {
                        for job in recovered {
                            tracing::warn!(
                                job_id = %job.id,
                                job_name = %job.name,
                                "Released expired claim, job is now {}",
                                job.state
                            );
                            let _ = state.event_tx.send(JobEvent::JobLeaseExpired {
                                job_id: job.id,
                                new_state: job.state,
                                timestamp: Utc::now(),
                            });
                        }
                    }
                    Err(e) => tracing::warn!("Failed to recover expired jobs: {}", e),
                }

                let retention = chrono::Duration::from_std(state.config.retention)
                    .unwrap_or(chrono::Duration::MAX);
                let cutoff = Utc::now()
                    .checked_sub_signed(retention)
                    .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
                match state.jobs.purge_terminal(&state.config.name, cutoff).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Purged {} finished jobs", n),
                    Err(e) => tracing::warn!("Failed to purge finished jobs: {}", e),
                }
            }

            PoolMessage::WorkerCount { reply } => {
                let _ = reply.send(state.workers.len());
            }

            PoolMessage::Shutdown => {
                if state.stopping {
                    return Ok(());
                }
                tracing::info!(
                    "Shutting down worker pool for '{}', draining {} workers",
                    state.config.name,
                    state.workers.len()
                );
                state.stopping = true;
                for (_, worker) in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                // Stopping now would take the linked workers down mid-job;
                // the last ActorTerminated stops the pool instead.
                if state.workers.is_empty() {
                    myself.stop(None);
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            _ => return Ok(()),
        };

        let Some((worker_id, _)) = state.workers.remove(&cell.get_id()) else {
            return Ok(());
        };

        if state.stopping {
            tracing::debug!("Worker {} drained", worker_id);
            if state.workers.is_empty() {
                tracing::info!("Worker pool for '{}' drained", state.config.name);
                myself.stop(None);
            }
            return Ok(());
        }

        tracing::warn!("Worker {} stopped unexpectedly: {:?}; restarting", worker_id, reason);
        spawn_worker(myself.get_cell(), state, worker_id).await
    }
}

/// Handle to a running worker pool.
pub struct PoolHandle {
    actor: ActorRef<PoolMessage>,
    handle: tokio::task::JoinHandle<()>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl PoolHandle {
    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    pub fn actor(&self) -> &ActorRef<PoolMessage> {
        &self.actor
    }

    /// Number of live workers.
    pub async fn worker_count(&self) -> Option<usize> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| PoolMessage::WorkerCount { reply },
            Some(Duration::from_secs(5)),
        )
        .await;
        match result {
            Ok(ractor::rpc::CallResult::Success(count)) => Some(count),
            _ => None,
        }
    }

    /// Stop all workers and wait for the pool to exit.
    ///
    /// Returns once every job in hand has been recorded.
    pub async fn shutdown(self) {
        let _ = self.actor.send_message(PoolMessage::Shutdown);
        let _ = self.handle.await;
    }

    /// Wait until the pool exits.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

/// Start a worker pool over `db` with the given handlers.
pub async fn start_worker_pool(
    db: Database,
    handlers: Arc<dyn JobHandlers>,
    config: QueueConfig,
) -> Result<PoolHandle, ractor::SpawnErr> {
    let (event_tx, _) = broadcast::channel(1024);
    let args = PoolArgs {
        db,
        handlers,
        config,
        event_tx: event_tx.clone(),
    };

    let (actor, handle) = Actor::spawn(None, Supervisor, args).await?;

    Ok(PoolHandle {
        actor,
        handle,
        event_tx,
    })
}

/// Wait for the final event of `job_id` on a pool subscription.
pub async fn wait_for_final_event(
    events: &mut broadcast::Receiver<JobEvent>,
    job_id: JobId,
) -> Option<JobEvent> {
    loop {
        match events.recv().await {
            Ok(event) if event.job_id() == Some(job_id) && event.is_final() => return Some(event),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
