//! `handle-chat-event` handler.

use std::sync::Arc;

use actors::HandlerResult;
use jobs_core::{ChatEvent, HandlerError, JobResult, MessageContent};

use crate::line::{ChatApi, OutboundMessage};

/// Reacts to one inbound chat event.
#[derive(Clone)]
pub struct ChatEventHandler {
    api: Arc<dyn ChatApi>,
}

impl ChatEventHandler {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    pub async fn handle(&self, event: ChatEvent) -> HandlerResult {
        let source_id = event
            .source()
            .and_then(|s| s.id())
            .unwrap_or("unknown")
            .to_string();

        match event {
            ChatEvent::Follow { .. } => {
                tracing::info!(user_id = %source_id, "New follower");
                Ok(JobResult::new(format!("follow from {}", source_id)))
            }
            ChatEvent::Unfollow { .. } => {
                tracing::info!(user_id = %source_id, "User unfollowed");
                Ok(JobResult::new(format!("unfollow from {}", source_id)))
            }
            ChatEvent::Join { .. } => {
                tracing::info!(chat_id = %source_id, "Joined chat");
                Ok(JobResult::new(format!("joined {}", source_id)))
            }
            ChatEvent::Leave { .. } => {
                tracing::info!(chat_id = %source_id, "Left chat");
                Ok(JobResult::new(format!("left {}", source_id)))
            }
            ChatEvent::Message {
                reply_token,
                message: MessageContent::Text { text },
                ..
            } => {
                tracing::info!(user_id = %source_id, "Message received: {}", text);
                if reply_token.is_empty() {
                    return Err(HandlerError::terminal("message event without reply token"));
                }

                let echo = format!("You said: {}", text);
                self.api
                    .reply(reply_token, vec![OutboundMessage::text(echo.clone())])
                    .await?;
                Ok(JobResult::new(echo))
            }
            ChatEvent::Message { .. } | ChatEvent::Unsupported => {
                tracing::debug!(source = %source_id, "Ignoring chat event");
                Ok(JobResult::new("ignored"))
            }
        }
    }
}
