#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use db::{Database, DbConfig, DbError, EnqueueError, EnqueueFuture, JobSink};
use handlers::{
    ChatApi, ChatFuture, MissionFuture, MissionLedger, MissionServiceError, OutboundMessage,
    SettleOutcome,
};
use jobs_core::JobId;
use serde_json::Value;

pub async fn setup_db() -> Result<Database, DbError> {
    Database::connect(DbConfig::memory()).await
}

/// Webhook router served on an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(sink: Arc<dyn JobSink>) -> Self {
        let app = api::router(sink);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Sink that accepts the first `ok` pushes and fails the rest.
pub struct FlakySink {
    ok: usize,
    pushes: AtomicUsize,
    pub pushed: Mutex<Vec<(String, Value)>>,
}

impl FlakySink {
    pub fn new(ok: usize) -> Self {
        Self {
            ok,
            pushes: AtomicUsize::new(0),
            pushed: Mutex::new(Vec::new()),
        }
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

impl JobSink for FlakySink {
    fn push(&self, name: String, payload: Value, _key: Option<String>) -> EnqueueFuture {
        let n = self.pushes.fetch_add(1, Ordering::SeqCst);
        self.pushed.lock().unwrap().push((name, payload));
        let ok = n < self.ok;
        Box::pin(async move {
            if ok {
                Ok(JobId::new())
            } else {
                Err(EnqueueError::Broker(DbError::Query("connection refused".into())))
            }
        })
    }
}

/// Chat API that records replies and pushes instead of calling LINE.
#[derive(Clone, Default)]
pub struct RecordingChat {
    pub replies: Arc<Mutex<Vec<(String, Vec<OutboundMessage>)>>>,
    pub pushes: Arc<Mutex<Vec<(String, Vec<OutboundMessage>)>>>,
}

impl ChatApi for RecordingChat {
    fn reply(&self, reply_token: String, messages: Vec<OutboundMessage>) -> ChatFuture {
        self.replies.lock().unwrap().push((reply_token, messages));
        Box::pin(async { Ok(()) })
    }

    fn push(&self, to: String, messages: Vec<OutboundMessage>) -> ChatFuture {
        self.pushes.lock().unwrap().push((to, messages));
        Box::pin(async { Ok(()) })
    }
}

/// Ledger that knows no missions.
pub struct EmptyLedger;

impl MissionLedger for EmptyLedger {
    fn is_settled(&self, mission_id: String) -> MissionFuture<bool> {
        Box::pin(async move { Err(MissionServiceError::NotFound(mission_id)) })
    }

    fn settle(&self, mission_id: String) -> MissionFuture<SettleOutcome> {
        Box::pin(async move { Err(MissionServiceError::NotFound(mission_id)) })
    }
}
