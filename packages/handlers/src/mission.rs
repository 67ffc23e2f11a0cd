//! Mission service client and the `settle-mission` handler.
//!
//! Settlement rules live in the mission service. This side only asks
//! whether a mission is settled and, if not, asks the service to settle it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use actors::{DueFuture, DueItem, DueSource, DueSourceError, HandlerResult};
use jobs_core::{HandlerError, JobResult, SendReminder, SettleMission};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Default mission service address for local development.
pub const DEFAULT_MISSION_SERVICE_URL: &str = "http://127.0.0.1:8545";

/// Mission service failures.
#[derive(Debug, Error)]
pub enum MissionServiceError {
    #[error("invalid mission service url: {0}")]
    InvalidUrl(String),
    #[error("mission service request failed: {0}")]
    Network(String),
    #[error("mission not found: {0}")]
    NotFound(String),
    #[error("mission service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid mission service response: {0}")]
    InvalidResponse(String),
}

impl MissionServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            MissionServiceError::Network(_) => true,
            MissionServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            MissionServiceError::InvalidUrl(_)
            | MissionServiceError::NotFound(_)
            | MissionServiceError::InvalidResponse(_) => false,
        }
    }
}

impl From<MissionServiceError> for HandlerError {
    fn from(err: MissionServiceError) -> Self {
        if err.is_retryable() {
            HandlerError::Retryable(err.to_string())
        } else {
            HandlerError::Terminal(err.to_string())
        }
    }
}

impl From<MissionServiceError> for DueSourceError {
    fn from(err: MissionServiceError) -> Self {
        match err {
            MissionServiceError::InvalidResponse(reason) => DueSourceError::InvalidResponse(reason),
            other => DueSourceError::Unavailable(other.to_string()),
        }
    }
}

/// Result of a settle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled,
    /// Someone else settled it first.
    AlreadySettled,
}

/// Future returned by [`MissionLedger`] calls.
pub type MissionFuture<T> = Pin<Box<dyn Future<Output = Result<T, MissionServiceError>> + Send>>;

/// Authoritative mission state.
pub trait MissionLedger: Send + Sync + 'static {
    fn is_settled(&self, mission_id: String) -> MissionFuture<bool>;

    fn settle(&self, mission_id: String) -> MissionFuture<SettleOutcome>;
}

#[derive(Deserialize)]
struct MissionStatus {
    settled: bool,
}

/// HTTP client for the mission service. Also tells the scheduler what is due.
#[derive(Debug, Clone)]
pub struct HttpMissionService {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpMissionService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MissionServiceError> {
        let base_url =
            Url::parse(base_url).map_err(|e| MissionServiceError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(MissionServiceError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MissionServiceError::Network(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, MissionServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MissionServiceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, MissionServiceError> {
        let resp = self
            .http
            .get(self.url(segments)?)
            .send()
            .await
            .map_err(|e| MissionServiceError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MissionServiceError::NotFound(segments.join("/")));
        }
        if !status.is_success() {
            return Err(error_status(status, resp).await);
        }

        resp.json()
            .await
            .map_err(|e| MissionServiceError::InvalidResponse(e.to_string()))
    }

    async fn post(
        &self,
        segments: &[&str],
        body: Option<&SendReminder>,
    ) -> Result<StatusCode, MissionServiceError> {
        let mut req = self.http.post(self.url(segments)?);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MissionServiceError::Network(e.to_string()))?;
        Ok(resp.status())
    }
}

async fn error_status(status: StatusCode, resp: reqwest::Response) -> MissionServiceError {
    MissionServiceError::Status {
        status: status.as_u16(),
        body: resp.text().await.unwrap_or_default(),
    }
}

impl MissionLedger for HttpMissionService {
    fn is_settled(&self, mission_id: String) -> MissionFuture<bool> {
        let service = self.clone();
        Box::pin(async move {
            let status: MissionStatus = service.get_json(&["missions", mission_id.as_str()]).await?;
            Ok(status.settled)
        })
    }

    fn settle(&self, mission_id: String) -> MissionFuture<SettleOutcome> {
        let service = self.clone();
        Box::pin(async move {
            let status = service
                .post(&["missions", mission_id.as_str(), "settle"], None)
                .await?;

            if status.is_success() {
                Ok(SettleOutcome::Settled)
            } else if status == StatusCode::CONFLICT {
                Ok(SettleOutcome::AlreadySettled)
            } else if status == StatusCode::NOT_FOUND {
                Err(MissionServiceError::NotFound(mission_id))
            } else {
                Err(MissionServiceError::Status {
                    status: status.as_u16(),
                    body: String::new(),
                })
            }
        })
    }
}

impl DueSource for HttpMissionService {
    fn due_items(&self) -> DueFuture<Vec<DueItem>> {
        let service = self.clone();
        Box::pin(async move {
            let missions = service.get_json::<Vec<String>>(&["missions", "due"]).await;
            let reminders = service
                .get_json::<Vec<SendReminder>>(&["reminders", "due"])
                .await;

            // One endpoint failing must not hold back what the other returned.
            let (missions, reminders) = match (missions, reminders) {
                (Err(missions_err), Err(reminders_err)) => {
                    tracing::warn!("Failed to load due reminders: {}", reminders_err);
                    return Err(missions_err.into());
                }
                (Ok(missions), Err(e)) => {
                    tracing::warn!("Failed to load due reminders: {}", e);
                    (missions, Vec::new())
                }
                (Err(e), Ok(reminders)) => {
                    tracing::warn!("Failed to load due missions: {}", e);
                    (Vec::new(), reminders)
                }
                (Ok(missions), Ok(reminders)) => (missions, reminders),
            };

            let items = missions
                .into_iter()
                .map(|mission_id| DueItem::Mission(SettleMission { mission_id }))
                .chain(reminders.into_iter().map(DueItem::Reminder))
                .collect();
            Ok(items)
        })
    }

    fn acknowledge(&self, item: DueItem) -> DueFuture<()> {
        let service = self.clone();
        Box::pin(async move {
            let status = match &item {
                DueItem::Mission(m) => {
                    service
                        .post(&["missions", m.mission_id.as_str(), "scheduled"], None)
                        .await?
                }
                DueItem::Reminder(r) => service.post(&["reminders", "scheduled"], Some(r)).await?,
            };

            if status.is_success() {
                Ok(())
            } else {
                Err(DueSourceError::Unavailable(format!(
                    "acknowledge returned {}",
                    status
                )))
            }
        })
    }
}

/// `settle-mission` handler. Checks the ledger first so redelivery never
/// settles twice.
#[derive(Clone)]
pub struct SettlementHandler {
    ledger: Arc<dyn MissionLedger>,
}

impl SettlementHandler {
    pub fn new(ledger: Arc<dyn MissionLedger>) -> Self {
        Self { ledger }
    }

    pub async fn handle(&self, payload: SettleMission) -> HandlerResult {
        let mission_id = payload.mission_id;
        if mission_id.is_empty() {
            return Err(HandlerError::terminal("settle-mission without mission id"));
        }

        if self.ledger.is_settled(mission_id.clone()).await? {
            tracing::info!(mission_id = %mission_id, "Mission already settled, nothing to do");
            return Ok(JobResult::new(format!("mission {} already settled", mission_id)));
        }

        tracing::info!(mission_id = %mission_id, "Settling mission");
        match self.ledger.settle(mission_id.clone()).await? {
            SettleOutcome::Settled => Ok(JobResult::new(format!("settled mission {}", mission_id))),
            SettleOutcome::AlreadySettled => {
                tracing::info!(mission_id = %mission_id, "Mission was settled concurrently");
                Ok(JobResult::new(format!("mission {} already settled", mission_id)))
            }
        }
    }
}
