//! Typed job kinds and their payloads.
//!
//! Jobs travel as `{ name, data }`. Producers may enqueue any name; workers
//! decode into [`JobKind`] and anything that does not decode is a dead job.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// Tag for jobs carrying one inbound chat-platform event.
pub const HANDLE_CHAT_EVENT: &str = "handle-chat-event";
/// Tag for mission settlement jobs.
pub const SETTLE_MISSION: &str = "settle-mission";
/// Tag for reminder delivery jobs.
pub const SEND_REMINDER: &str = "send-reminder";

/// Every job the current handlers can process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum JobKind {
    HandleChatEvent(HandleChatEvent),
    SettleMission(SettleMission),
    SendReminder(SendReminder),
}

impl JobKind {
    /// Job names with a handler.
    pub const NAMES: [&'static str; 3] = [HANDLE_CHAT_EVENT, SETTLE_MISSION, SEND_REMINDER];

    /// The wire name of this job.
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::HandleChatEvent(_) => HANDLE_CHAT_EVENT,
            JobKind::SettleMission(_) => SETTLE_MISSION,
            JobKind::SendReminder(_) => SEND_REMINDER,
        }
    }

    /// The `data` half of the wire shape.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            JobKind::HandleChatEvent(p) => serde_json::to_value(p),
            JobKind::SettleMission(p) => serde_json::to_value(p),
            JobKind::SendReminder(p) => serde_json::to_value(p),
        }
    }

    /// Deduplication key for work that must not be queued twice while active.
    pub fn idempotency_key(&self) -> Option<String> {
        match self {
            JobKind::HandleChatEvent(_) => None,
            JobKind::SettleMission(p) => Some(format!("{}:{}", SETTLE_MISSION, p.mission_id)),
            JobKind::SendReminder(p) => {
                Some(format!("{}:{}:{}", SEND_REMINDER, p.user_id, p.message))
            }
        }
    }

    /// Decode a stored `(name, data)` pair.
    pub fn decode(name: &str, data: &Value) -> Result<Self, DispatchError> {
        let malformed = |e: serde_json::Error| DispatchError::MalformedPayload {
            name: name.to_string(),
            reason: e.to_string(),
        };

        match name {
            HANDLE_CHAT_EVENT => HandleChatEvent::deserialize(data)
                .map(JobKind::HandleChatEvent)
                .map_err(malformed),
            SETTLE_MISSION => SettleMission::deserialize(data)
                .map(JobKind::SettleMission)
                .map_err(malformed),
            SEND_REMINDER => SendReminder::deserialize(data)
                .map(JobKind::SendReminder)
                .map_err(malformed),
            other => Err(DispatchError::UnknownJob(other.to_string())),
        }
    }
}

/// Payload of `handle-chat-event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleChatEvent {
    pub event: ChatEvent,
}

/// Payload of `settle-mission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleMission {
    pub mission_id: String,
}

/// Payload of `send-reminder`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReminder {
    pub user_id: String,
    pub message: String,
}

/// Inbound chat-platform (LINE) webhook event.
///
/// Only the fields the handlers read are modelled; everything else in the
/// original event is ignored when decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    Follow {
        source: EventSource,
    },
    Unfollow {
        source: EventSource,
    },
    Join {
        source: EventSource,
    },
    Leave {
        source: EventSource,
    },
    Message {
        source: EventSource,
        reply_token: String,
        message: MessageContent,
    },
    #[serde(other)]
    Unsupported,
}

impl ChatEvent {
    /// Short event type for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::Follow { .. } => "follow",
            ChatEvent::Unfollow { .. } => "unfollow",
            ChatEvent::Join { .. } => "join",
            ChatEvent::Leave { .. } => "leave",
            ChatEvent::Message { .. } => "message",
            ChatEvent::Unsupported => "unsupported",
        }
    }

    pub fn source(&self) -> Option<&EventSource> {
        match self {
            ChatEvent::Follow { source }
            | ChatEvent::Unfollow { source }
            | ChatEvent::Join { source }
            | ChatEvent::Leave { source }
            | ChatEvent::Message { source, .. } => Some(source),
            ChatEvent::Unsupported => None,
        }
    }
}

/// Where an event came from. LINE sends `type` plus the matching id, but
/// some senders omit `type`, so every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl EventSource {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            kind: Some("user".into()),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// Group or room id, for join/leave events.
    pub fn chat_id(&self) -> Option<&str> {
        self.group_id.as_deref().or(self.room_id.as_deref())
    }

    /// Most specific id available.
    pub fn id(&self) -> Option<&str> {
        self.chat_id().or(self.user_id.as_deref())
    }
}

/// Message content of a `message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageContent {
    Text { text: String },
    #[serde(other)]
    Other,
}
