//! LINE Messaging API client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use jobs_core::HandlerError;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Production LINE API base URL.
pub const DEFAULT_LINE_API_BASE: &str = "https://api.line.me";

/// LINE API failures, classified for the retry decision.
#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("LINE request failed: {0}")]
    Network(String),
    #[error("LINE rejected the reply token: {0}")]
    InvalidReplyToken(String),
    #[error("LINE API returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl ChatApiError {
    /// Network failures, throttling and server errors may pass on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatApiError::Network(_) => true,
            ChatApiError::InvalidReplyToken(_) => false,
            ChatApiError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<ChatApiError> for HandlerError {
    fn from(err: ChatApiError) -> Self {
        if err.is_retryable() {
            HandlerError::Retryable(err.to_string())
        } else {
            HandlerError::Terminal(err.to_string())
        }
    }
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Text { text: String },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        OutboundMessage::Text { text: text.into() }
    }
}

/// Future returned by [`ChatApi`] calls.
pub type ChatFuture = Pin<Box<dyn Future<Output = Result<(), ChatApiError>> + Send>>;

/// Outbound side of the chat platform.
pub trait ChatApi: Send + Sync + 'static {
    /// Answer an event through its single-use reply token.
    fn reply(&self, reply_token: String, messages: Vec<OutboundMessage>) -> ChatFuture;

    /// Send messages to a user, group or room at any time.
    fn push(&self, to: String, messages: Vec<OutboundMessage>) -> ChatFuture;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest {
    reply_token: String,
    messages: Vec<OutboundMessage>,
}

#[derive(Serialize)]
struct PushRequest {
    to: String,
    messages: Vec<OutboundMessage>,
}

/// [`ChatApi`] over the LINE Messaging API.
#[derive(Debug, Clone)]
pub struct LineClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl LineClient {
    /// Create a client. Every request is bounded by `timeout`.
    pub fn new(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ChatApiError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatApiError::Network(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify(status, body))
    }
}

/// LINE answers 400 "Invalid reply token" for used or expired tokens.
fn classify(status: StatusCode, body: String) -> ChatApiError {
    if status == StatusCode::BAD_REQUEST && body.to_lowercase().contains("reply token") {
        return ChatApiError::InvalidReplyToken(body);
    }
    ChatApiError::Status {
        status: status.as_u16(),
        body,
    }
}

impl ChatApi for LineClient {
    fn reply(&self, reply_token: String, messages: Vec<OutboundMessage>) -> ChatFuture {
        let client = self.clone();
        Box::pin(async move {
            let body = ReplyRequest {
                reply_token,
                messages,
            };
            client.post("/v2/bot/message/reply", &body).await
        })
    }

    fn push(&self, to: String, messages: Vec<OutboundMessage>) -> ChatFuture {
        let client = self.clone();
        Box::pin(async move {
            let body = PushRequest { to, messages };
            client.post("/v2/bot/message/push", &body).await
        })
    }
}
