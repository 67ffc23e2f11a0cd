//! Core domain types for the mission job queue.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobState and RetryPolicy for work items
//! - JobKind and the per-job payloads, including chat events
//! - HandlerError / DispatchError for failure classification
//! - Events for lifecycle observers

mod error;
mod events;
mod job;
mod kind;
mod queue;

pub use error::{DispatchError, HandlerError};
pub use events::JobEvent;
pub use job::{Job, JobId, JobResult, JobState, RetryPolicy};
pub use kind::{
    ChatEvent, EventSource, HANDLE_CHAT_EVENT, HandleChatEvent, JobKind, MessageContent,
    SEND_REMINDER, SETTLE_MISSION, SendReminder, SettleMission,
};
pub use queue::{DEFAULT_QUEUE, QueueConfig, QueueStats};
