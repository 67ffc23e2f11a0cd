//! Actor system for the job queue.
//!
//! This crate provides the Ractor-based worker pool and scheduler.
//!
//! # Architecture
//!
//! - `Supervisor` - Owns the workers of one queue, restarts them and runs
//!   housekeeping (expired claims, old finished jobs)
//! - `WorkerActor` - Claims and executes jobs one at a time
//! - `SchedulerActor` - Enqueues due missions and reminders every tick
//!
//! # Usage
//!
//! ```ignore
//! use actors::start_worker_pool;
//!
//! let pool = start_worker_pool(db, Arc::new(handlers), QueueConfig::default()).await?;
//! let mut events = pool.subscribe();
//! ```

mod handler;
mod messages;
mod scheduler;
mod supervisor;
mod worker_actor;

pub use handler::{HandlerFuture, HandlerResult, JobHandlers, dispatch};
pub use messages::{PoolMessage, SchedulerMessage, WorkerMessage};
pub use scheduler::{
    DueFuture, DueItem, DueSource, DueSourceError, InMemoryDueSource, SchedulerActor, TickReport,
    run_tick, start_scheduler,
};
pub use supervisor::{PoolHandle, Supervisor, start_worker_pool, wait_for_final_event};
pub use worker_actor::{Delivery, JobRunner, WorkerActor};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
