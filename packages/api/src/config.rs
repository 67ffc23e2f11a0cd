//! Environment configuration.

use std::str::FromStr;
use std::time::Duration;

use db::{DEFAULT_HOST, DEFAULT_PORT, DbConfig};
use handlers::{DEFAULT_LINE_API_BASE, DEFAULT_MISSION_SERVICE_URL};
use jobs_core::{QueueConfig, RetryPolicy};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Process configuration read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub broker: DbConfig,
    /// Webhook listen port.
    pub port: u16,
    pub concurrency: u32,
    pub max_attempts: u32,
    pub scheduler_interval: Duration,
    pub line_access_token: Option<String>,
    /// Only used by signature verification in front of this service.
    pub line_channel_secret: Option<String>,
    pub line_api_base: String,
    pub mission_service_url: String,
}

impl AppConfig {
    /// Read the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("BROKER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let broker_port = parse(&var, "BROKER_PORT", DEFAULT_PORT)?;
        let mut broker = DbConfig::remote(host, broker_port);
        if let Some(endpoint) = var("BROKER_ENDPOINT") {
            broker = broker.with_endpoint(endpoint);
        }
        if let Some(namespace) = var("BROKER_NAMESPACE") {
            broker = broker.with_namespace(namespace);
        }
        if let Some(database) = var("BROKER_DATABASE") {
            broker = broker.with_database(database);
        }
        if let (Some(user), Some(pass)) = (var("BROKER_USER"), var("BROKER_PASS")) {
            broker = broker.with_credentials(user, pass);
        }

        let concurrency: u32 = parse(&var, "WORKER_CONCURRENCY", 4)?;
        if concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0"));
        }
        let max_attempts: u32 = parse(&var, "JOB_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(invalid("JOB_MAX_ATTEMPTS", "0"));
        }
        let interval_secs: u64 = parse(&var, "SCHEDULER_INTERVAL_SECS", 60)?;
        if interval_secs == 0 {
            return Err(invalid("SCHEDULER_INTERVAL_SECS", "0"));
        }

        Ok(Self {
            broker,
            port: parse(&var, "PORT", 3000)?,
            concurrency,
            max_attempts,
            scheduler_interval: Duration::from_secs(interval_secs),
            line_access_token: var("LINE_CHANNEL_ACCESS_TOKEN"),
            line_channel_secret: var("LINE_CHANNEL_SECRET"),
            line_api_base: var("LINE_API_BASE")
                .unwrap_or_else(|| DEFAULT_LINE_API_BASE.to_string()),
            mission_service_url: var("MISSION_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_MISSION_SERVICE_URL.to_string()),
        })
    }

    /// Worker pool settings for the `tasks` queue.
    pub fn queue_config(&self) -> QueueConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        QueueConfig::default()
            .with_concurrency(self.concurrency)
            .with_retry(retry)
    }

    /// The LINE token; workers cannot run without it.
    pub fn require_line_access_token(&self) -> Result<&str, ConfigError> {
        self.line_access_token
            .as_deref()
            .ok_or(ConfigError::Missing("LINE_CHANNEL_ACCESS_TOKEN"))
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
    }
}

fn parse<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(name, &raw)),
        None => Ok(default),
    }
}
