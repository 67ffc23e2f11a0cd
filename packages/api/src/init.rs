//! Composition root: builds every component from [`AppConfig`] and wires
//! them together. Nothing here is global; each role gets its own handles.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use actors::{ActorRef, PoolHandle, SchedulerMessage, start_scheduler, start_worker_pool};
use db::{Database, DbError, QueueClient};
use handlers::{
    AppHandlers, ChatApiError, DEFAULT_REQUEST_TIMEOUT, HttpMissionService, LineClient,
    MissionServiceError,
};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::{AppConfig, ConfigError};
use crate::webhook;

/// Startup failures.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("broker: {0}")]
    Broker(#[from] DbError),
    #[error("mission service: {0}")]
    MissionService(#[from] MissionServiceError),
    #[error("LINE client: {0}")]
    Line(#[from] ChatApiError),
    #[error("failed to start actor: {0}")]
    Actor(String),
    #[error("http server: {0}")]
    Io(#[from] std::io::Error),
}

/// Which halves of the system this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// Webhook and scheduler.
    Serve,
    /// Worker pool.
    Work,
    #[default]
    All,
}

impl Role {
    pub fn runs_producers(self) -> bool {
        matches!(self, Role::Serve | Role::All)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, Role::Work | Role::All)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serve" => Ok(Role::Serve),
            "work" => Ok(Role::Work),
            "all" => Ok(Role::All),
            other => Err(format!("unknown role '{}', expected serve, work or all", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Serve => "serve",
            Role::Work => "work",
            Role::All => "all",
        };
        f.write_str(name)
    }
}

/// Producer client stamped with the configured delivery budget.
pub fn queue_client(config: &AppConfig, db: Database) -> QueueClient {
    QueueClient::new(db).with_max_attempts(config.max_attempts)
}

/// Running webhook server and scheduler.
pub struct Producers {
    pub addr: SocketAddr,
    scheduler: ActorRef<SchedulerMessage>,
    scheduler_handle: tokio::task::JoinHandle<()>,
    server_stop: oneshot::Sender<()>,
    server_handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl Producers {
    /// Stop accepting webhooks, stop the scheduler and wait for both.
    pub async fn shutdown(self) {
        let _ = self.server_stop.send(());
        match self.server_handle.await {
            Ok(Err(e)) => tracing::warn!("Webhook server stopped with error: {}", e),
            Err(e) => tracing::warn!("Webhook server task failed: {}", e),
            Ok(Ok(())) => {}
        }

        let _ = self.scheduler.send_message(SchedulerMessage::Shutdown);
        let _ = self.scheduler_handle.await;
    }
}

/// Start the webhook server on `config.port` and the scheduler.
pub async fn start_producers(config: &AppConfig, db: Database) -> Result<Producers, InitError> {
    let client = Arc::new(queue_client(config, db));

    let missions = HttpMissionService::new(&config.mission_service_url, DEFAULT_REQUEST_TIMEOUT)?;
    let (scheduler, scheduler_handle) =
        start_scheduler(Arc::new(missions), client.clone(), config.scheduler_interval)
            .await
            .map_err(|e| InitError::Actor(e.to_string()))?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let addr = listener.local_addr()?;
    let app = webhook::router(client);
    let (server_stop, stop_rx) = oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });
    tracing::info!("Webhook listening on {}", addr);

    Ok(Producers {
        addr,
        scheduler,
        scheduler_handle,
        server_stop,
        server_handle,
    })
}

/// Start the worker pool with the production handlers.
pub async fn start_workers(config: &AppConfig, db: Database) -> Result<PoolHandle, InitError> {
    let line = LineClient::new(
        config.require_line_access_token()?,
        &config.line_api_base,
        DEFAULT_REQUEST_TIMEOUT,
    )?;
    let missions = HttpMissionService::new(&config.mission_service_url, DEFAULT_REQUEST_TIMEOUT)?;
    let handlers = AppHandlers::new(Arc::new(line), Arc::new(missions));

    let pool = start_worker_pool(db, Arc::new(handlers), config.queue_config())
        .await
        .map_err(|e| InitError::Actor(e.to_string()))?;
    Ok(pool)
}

/// Run `role` until Ctrl-C, then shut down producers before workers.
pub async fn run(role: Role, config: AppConfig) -> Result<(), InitError> {
    tracing::info!("Starting in '{}' role", role);

    // Fail before connecting when the worker side is misconfigured.
    if role.runs_workers() {
        config.require_line_access_token()?;
    }

    let db = Database::connect(config.broker.clone()).await?;

    let pool = if role.runs_workers() {
        Some(start_workers(&config, db.clone()).await?)
    } else {
        None
    };
    let producers = if role.runs_producers() {
        Some(start_producers(&config, db).await?)
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    if let Some(producers) = producers {
        producers.shutdown().await;
    }
    if let Some(pool) = pool {
        pool.shutdown().await;
    }

    tracing::info!("Stopped");
    Ok(())
}
