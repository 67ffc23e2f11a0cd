//! `send-reminder` handler.

use std::sync::Arc;

use actors::HandlerResult;
use jobs_core::{HandlerError, JobResult, SendReminder};

use crate::line::{ChatApi, OutboundMessage};

/// Pushes reminder text to a user. Duplicate pushes are tolerated.
#[derive(Clone)]
pub struct ReminderHandler {
    api: Arc<dyn ChatApi>,
}

impl ReminderHandler {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    pub async fn handle(&self, reminder: SendReminder) -> HandlerResult {
        if reminder.user_id.is_empty() {
            return Err(HandlerError::terminal("reminder without user id"));
        }

        tracing::info!(user_id = %reminder.user_id, "Sending reminder");
        self.api
            .push(
                reminder.user_id.clone(),
                vec![OutboundMessage::text(reminder.message)],
            )
            .await?;

        Ok(JobResult::new(format!("reminded {}", reminder.user_id)))
    }
}
