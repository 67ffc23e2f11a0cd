#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{HandlerFuture, JobHandlers};
use db::{Database, DbConfig, DbError};
use jobs_core::{HandleChatEvent, HandlerError, JobResult, SendReminder, SettleMission};

/// Every test gets its own in-memory broker.
pub async fn setup_db() -> Result<Database, DbError> {
    Database::connect(DbConfig::memory()).await
}

/// How the fake handlers answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    /// Retryable failure on the first call, success afterwards.
    FailOnce,
    AlwaysFail,
    Terminal,
    Panic,
    /// Succeeds after a pause long enough to shut down mid-job.
    Slow,
}

/// Handlers that record every call and answer per [`Behavior`].
#[derive(Clone)]
pub struct FakeHandlers {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<String>>>,
    invocations: Arc<AtomicU32>,
}

impl FakeHandlers {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, call: String) -> HandlerFuture {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().unwrap().push(call.clone());
        let behavior = self.behavior;

        Box::pin(async move {
            match behavior {
                Behavior::Succeed => Ok(JobResult::new(call)),
                Behavior::FailOnce if n == 1 => Err(HandlerError::retryable("first call fails")),
                Behavior::FailOnce => Ok(JobResult::new(call)),
                Behavior::AlwaysFail => Err(HandlerError::retryable("still failing")),
                Behavior::Terminal => Err(HandlerError::terminal("rejected")),
                Behavior::Panic => panic!("handler blew up"),
                Behavior::Slow => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(JobResult::new(call))
                }
            }
        })
    }
}

impl JobHandlers for FakeHandlers {
    fn handle_chat_event(&self, payload: HandleChatEvent) -> HandlerFuture {
        self.answer(format!("chat:{}", payload.event.event_type()))
    }

    fn settle_mission(&self, payload: SettleMission) -> HandlerFuture {
        self.answer(format!("settle:{}", payload.mission_id))
    }

    fn send_reminder(&self, payload: SendReminder) -> HandlerFuture {
        self.answer(format!("remind:{}:{}", payload.user_id, payload.message))
    }
}
