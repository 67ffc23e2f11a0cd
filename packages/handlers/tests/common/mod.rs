#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobs_core::SendReminder;
use serde_json::{Value, json};

/// One request seen by the fake server.
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

/// Shared state of the fake LINE + mission service.
#[derive(Clone, Default)]
pub struct FakeState {
    seen: Arc<Mutex<Vec<Seen>>>,
    settled: Arc<Mutex<HashSet<String>>>,
    due_missions: Arc<Mutex<Vec<String>>>,
    due_reminders: Arc<Mutex<Vec<SendReminder>>>,
    missions_down: Arc<AtomicBool>,
    reminders_down: Arc<AtomicBool>,
}

impl FakeState {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_at(&self, path: &str) -> Vec<Seen> {
        self.seen().into_iter().filter(|s| s.path == path).collect()
    }

    pub fn mark_settled(&self, mission_id: &str) {
        self.settled.lock().unwrap().insert(mission_id.to_string());
    }

    pub fn is_settled(&self, mission_id: &str) -> bool {
        self.settled.lock().unwrap().contains(mission_id)
    }

    pub fn add_due_mission(&self, mission_id: &str) {
        self.due_missions.lock().unwrap().push(mission_id.to_string());
    }

    pub fn add_due_reminder(&self, user_id: &str, message: &str) {
        self.due_reminders.lock().unwrap().push(SendReminder {
            user_id: user_id.into(),
            message: message.into(),
        });
    }

    /// Make `GET /missions/due` answer 500.
    pub fn break_due_missions(&self) {
        self.missions_down.store(true, Ordering::SeqCst);
    }

    /// Make `GET /reminders/due` answer 500.
    pub fn break_due_reminders(&self) {
        self.reminders_down.store(true, Ordering::SeqCst);
    }

    pub fn due_count(&self) -> usize {
        self.due_missions.lock().unwrap().len() + self.due_reminders.lock().unwrap().len()
    }

    fn record(&self, path: String, headers: &HeaderMap, body: Value) {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push(Seen {
            path,
            authorization,
            body,
        });
    }
}

/// Fake LINE API and mission service on an ephemeral port.
pub struct FakeServer {
    pub base_url: String,
    pub state: FakeState,
    handle: tokio::task::JoinHandle<()>,
}

impl FakeServer {
    pub async fn spawn() -> Self {
        let state = FakeState::default();
        let app = Router::new()
            .route("/v2/bot/message/reply", post(line_reply))
            .route("/v2/bot/message/push", post(line_push))
            .route("/missions/due", get(due_missions))
            .route("/reminders/due", get(due_reminders))
            .route("/reminders/scheduled", post(reminder_scheduled))
            .route("/missions/:id", get(mission_status))
            .route("/missions/:id/settle", post(settle_mission))
            .route("/missions/:id/scheduled", post(mission_scheduled))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn line_reply(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let token = body["replyToken"].as_str().unwrap_or_default().to_string();
    state.record("/v2/bot/message/reply".into(), &headers, body);

    match token.as_str() {
        "used" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "Invalid reply token"})),
        ),
        "busy" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "try again"})),
        ),
        _ => (StatusCode::OK, Json(json!({}))),
    }
}

async fn line_push(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("/v2/bot/message/push".into(), &headers, body);
    Json(json!({}))
}

async fn due_missions(State(state): State<FakeState>) -> Result<Json<Vec<String>>, StatusCode> {
    if state.missions_down.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(state.due_missions.lock().unwrap().clone()))
}

async fn due_reminders(
    State(state): State<FakeState>,
) -> Result<Json<Vec<SendReminder>>, StatusCode> {
    if state.reminders_down.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(state.due_reminders.lock().unwrap().clone()))
}

async fn mission_status(
    State(state): State<FakeState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if id == "missing" {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({"settled": state.is_settled(&id)})))
}

async fn settle_mission(
    State(state): State<FakeState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    state.record(format!("/missions/{}/settle", id), &headers, Value::Null);
    if state.settled.lock().unwrap().insert(id) {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

async fn mission_scheduled(
    State(state): State<FakeState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    state.record(format!("/missions/{}/scheduled", id), &headers, Value::Null);
    state.due_missions.lock().unwrap().retain(|m| m != &id);
    StatusCode::NO_CONTENT
}

async fn reminder_scheduled(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(reminder): Json<SendReminder>,
) -> StatusCode {
    state.record(
        "/reminders/scheduled".into(),
        &headers,
        serde_json::to_value(&reminder).unwrap(),
    );
    state.due_reminders.lock().unwrap().retain(|r| r != &reminder);
    StatusCode::NO_CONTENT
}
