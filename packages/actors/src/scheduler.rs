//! Scheduler actor that turns due work into jobs.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use db::JobSink;
use jobs_core::{JobKind, SendReminder, SettleMission};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::messages::SchedulerMessage;

/// One unit of due work offered by a [`DueSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DueItem {
    /// A mission whose deadline has passed.
    Mission(SettleMission),
    /// A reminder ready for delivery.
    Reminder(SendReminder),
}

impl DueItem {
    pub fn to_kind(&self) -> JobKind {
        match self {
            DueItem::Mission(m) => JobKind::SettleMission(m.clone()),
            DueItem::Reminder(r) => JobKind::SendReminder(r.clone()),
        }
    }
}

/// Failure to read or acknowledge due work.
#[derive(Debug, Error)]
pub enum DueSourceError {
    #[error("due source unavailable: {0}")]
    Unavailable(String),
    #[error("invalid due source response: {0}")]
    InvalidResponse(String),
}

/// Future returned by [`DueSource`] operations.
pub type DueFuture<T> = Pin<Box<dyn Future<Output = Result<T, DueSourceError>> + Send>>;

/// Where the scheduler learns what is due.
///
/// An item stays due until it is acknowledged, so a failed enqueue is
/// offered again on the next tick.
pub trait DueSource: Send + Sync + 'static {
    /// Items due now.
    fn due_items(&self) -> DueFuture<Vec<DueItem>>;

    /// Mark an item as scheduled.
    fn acknowledge(&self, item: DueItem) -> DueFuture<()>;
}

/// Due source backed by a local list. Used when no mission service is
/// configured, and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDueSource {
    items: Arc<Mutex<VecDeque<DueItem>>>,
}

impl InMemoryDueSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; duplicates are ignored.
    pub async fn push(&self, item: DueItem) {
        let mut items = self.items.lock().await;
        if !items.contains(&item) {
            items.push_back(item);
        }
    }

    /// Items not yet acknowledged.
    pub async fn pending(&self) -> Vec<DueItem> {
        self.items.lock().await.iter().cloned().collect()
    }
}

impl DueSource for InMemoryDueSource {
    fn due_items(&self) -> DueFuture<Vec<DueItem>> {
        let items = self.items.clone();
        Box::pin(async move { Ok(items.lock().await.iter().cloned().collect()) })
    }

    fn acknowledge(&self, item: DueItem) -> DueFuture<()> {
        let items = self.items.clone();
        Box::pin(async move {
            items.lock().await.retain(|i| i != &item);
            Ok(())
        })
    }
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub enqueued: usize,
    pub failed: usize,
}

/// Enqueue one job per due item.
///
/// Items are acknowledged only after their enqueue succeeded. Errors are
/// logged and counted, never returned.
pub async fn run_tick(source: &dyn DueSource, sink: &dyn JobSink) -> TickReport {
    let mut report = TickReport::default();

    let items = match source.due_items().await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!("Failed to load due items: {}", e);
            return report;
        }
    };

    for item in items {
        let kind = item.to_kind();
        let payload = match kind.payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(job_name = kind.name(), "Failed to encode due item: {}", e);
                report.failed += 1;
                continue;
            }
        };

        match sink
            .push(kind.name().to_string(), payload, kind.idempotency_key())
            .await
        {
            Ok(job_id) => {
                report.enqueued += 1;
                tracing::debug!(%job_id, job_name = kind.name(), "Scheduled job");
                if let Err(e) = source.acknowledge(item).await {
                    // Next tick offers it again; the idempotency key dedupes.
                    tracing::warn!(job_name = kind.name(), "Failed to acknowledge due item: {}", e);
                }
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(job_name = kind.name(), "Failed to enqueue due item: {}", e);
            }
        }
    }

    if report.enqueued > 0 || report.failed > 0 {
        tracing::info!(
            "Scheduler tick: {} enqueued, {} failed",
            report.enqueued,
            report.failed
        );
    }

    report
}

/// Arguments for the scheduler actor.
pub struct SchedulerArgs {
    pub source: Arc<dyn DueSource>,
    pub sink: Arc<dyn JobSink>,
    pub interval: Duration,
}

/// State for the scheduler actor.
pub struct SchedulerState {
    source: Arc<dyn DueSource>,
    sink: Arc<dyn JobSink>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

/// Actor that runs [`run_tick`] on a fixed cadence.
pub struct SchedulerActor;

impl Actor for SchedulerActor {
    type Msg = SchedulerMessage;
    type State = SchedulerState;
    type Arguments = SchedulerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting scheduler, ticking every {:?}", args.interval);

        let period = args.interval.max(Duration::from_millis(1));
        let myself_clone = myself.clone();
        let timer = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SchedulerMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(SchedulerState {
            source: args.source,
            sink: args.sink,
            timer: Some(timer),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SchedulerMessage::Tick => {
                run_tick(state.source.as_ref(), state.sink.as_ref()).await;
            }

            SchedulerMessage::TickNow { reply } => {
                let report = run_tick(state.source.as_ref(), state.sink.as_ref()).await;
                let _ = reply.send(report);
            }

            SchedulerMessage::Shutdown => {
                tracing::info!("Shutting down scheduler");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start the scheduler actor.
pub async fn start_scheduler(
    source: Arc<dyn DueSource>,
    sink: Arc<dyn JobSink>,
    interval: Duration,
) -> Result<(ActorRef<SchedulerMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let args = SchedulerArgs {
        source,
        sink,
        interval,
    };
    Actor::spawn(None, SchedulerActor, args).await
}
