//! Process-level wiring for the mission job system.
//!
//! - `webhook` - The LINE webhook producer and health check
//! - `config` - Environment configuration
//! - `init` - Composition root and role runner

mod config;
mod init;
mod webhook;

pub use config::{AppConfig, ConfigError};
pub use init::{InitError, Producers, Role, queue_client, run, start_producers, start_workers};
pub use webhook::{WebhookBody, WebhookState, router};
