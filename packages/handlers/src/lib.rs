//! Business handlers for every job kind.
//!
//! - `chat` - Echo replies and membership logging for LINE events
//! - `mission` - Mission settlement against the mission service
//! - `reminder` - Reminder pushes through LINE

mod chat;
mod line;
mod mission;
mod reminder;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actors::{HandlerFuture, HandlerResult, JobHandlers};
use jobs_core::{HandleChatEvent, HandlerError, SendReminder, SettleMission};

pub use chat::ChatEventHandler;
pub use line::{
    ChatApi, ChatApiError, ChatFuture, DEFAULT_LINE_API_BASE, LineClient, OutboundMessage,
};
pub use mission::{
    DEFAULT_MISSION_SERVICE_URL, HttpMissionService, MissionFuture, MissionLedger,
    MissionServiceError, SettleOutcome, SettlementHandler,
};
pub use reminder::ReminderHandler;

/// Upper bound for a single outbound HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for one handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// The production [`JobHandlers`] set.
#[derive(Clone)]
pub struct AppHandlers {
    chat: ChatEventHandler,
    settlement: SettlementHandler,
    reminders: ReminderHandler,
    timeout: Duration,
}

impl AppHandlers {
    pub fn new(chat_api: Arc<dyn ChatApi>, ledger: Arc<dyn MissionLedger>) -> Self {
        Self {
            chat: ChatEventHandler::new(chat_api.clone()),
            settlement: SettlementHandler::new(ledger),
            reminders: ReminderHandler::new(chat_api),
            timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run `fut`, turning an overrun into a retryable failure.
fn bounded<F>(timeout: Duration, fut: F) -> HandlerFuture
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    Box::pin(async move {
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(HandlerError::retryable(format!(
                    "handler timed out after {:?}",
                    timeout
                )))
            })
    })
}

impl JobHandlers for AppHandlers {
    fn handle_chat_event(&self, payload: HandleChatEvent) -> HandlerFuture {
        let handler = self.chat.clone();
        bounded(self.timeout, async move { handler.handle(payload.event).await })
    }

    fn settle_mission(&self, payload: SettleMission) -> HandlerFuture {
        let handler = self.settlement.clone();
        bounded(self.timeout, async move { handler.handle(payload).await })
    }

    fn send_reminder(&self, payload: SendReminder) -> HandlerFuture {
        let handler = self.reminders.clone();
        bounded(self.timeout, async move { handler.handle(payload).await })
    }
}
