use std::process::ExitCode;

use api::{AppConfig, Role};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let role = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<Role>() {
            Ok(role) => role,
            Err(e) => {
                tracing::error!("{}", e);
                return ExitCode::from(2);
            }
        },
        None => Role::default(),
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    match api::run(role, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
