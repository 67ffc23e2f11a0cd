//! Job handler trait and typed dispatch.

use std::future::Future;
use std::pin::Pin;

use jobs_core::{HandleChatEvent, HandlerError, Job, JobKind, JobResult, SendReminder, SettleMission};

/// Result type for job handlers.
pub type HandlerResult = Result<JobResult, HandlerError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Business logic for every job kind.
///
/// One method per [`JobKind`] variant, so adding a job kind is a compile
/// error until every implementation handles it. Implementations must be
/// idempotent: the queue delivers at least once.
pub trait JobHandlers: Send + Sync + 'static {
    /// Process one inbound chat event.
    fn handle_chat_event(&self, payload: HandleChatEvent) -> HandlerFuture;

    /// Settle a mission unless it is already settled.
    fn settle_mission(&self, payload: SettleMission) -> HandlerFuture;

    /// Deliver a reminder to a user.
    fn send_reminder(&self, payload: SendReminder) -> HandlerFuture;
}

/// Route a job to its handler.
///
/// Jobs that do not decode (unknown name, malformed payload) never reach a
/// handler and fail with a terminal error.
pub fn dispatch(handlers: &dyn JobHandlers, job: &Job) -> HandlerFuture {
    match job.kind() {
        Ok(JobKind::HandleChatEvent(payload)) => handlers.handle_chat_event(payload),
        Ok(JobKind::SettleMission(payload)) => handlers.settle_mission(payload),
        Ok(JobKind::SendReminder(payload)) => handlers.send_reminder(payload),
        Err(err) => {
            tracing::warn!(job_id = %job.id, job_name = %job.name, "Dispatch failed: {}", err);
            Box::pin(async move { Err(err.into()) })
        }
    }
}
