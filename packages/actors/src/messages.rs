//! Message types for actor communication.

use ractor::RpcReplyPort;

use crate::scheduler::TickReport;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Claim the next due job and run it.
    Poll,

    /// Stop once the job in hand, if any, has been recorded.
    Shutdown,
}

/// Messages for the worker pool supervisor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Periodic housekeeping: release expired leases, purge old jobs.
    Housekeeping,

    /// Number of live workers.
    WorkerCount { reply: RpcReplyPort<usize> },

    /// Drain the workers, then stop the pool.
    Shutdown,
}

/// Messages for the SchedulerActor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Timer tick.
    Tick,

    /// Run a tick right away and report what it did.
    TickNow { reply: RpcReplyPort<TickReport> },

    /// Stop the scheduler.
    Shutdown,
}
