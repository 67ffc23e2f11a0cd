//! Broker connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;

use crate::schema::init_schema;

/// Default broker host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default broker port.
pub const DEFAULT_PORT: u16 = 6379;

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// Connection endpoint: `mem://` or `ws://host:port`
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::remote(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl DbConfig {
    /// Create a config for a broker reachable over the network.
    pub fn remote(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            endpoint: format!("ws://{}:{}", host.as_ref(), port),
            namespace: "missions".to_string(),
            database: "jobs".to_string(),
            credentials: None,
        }
    }

    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            ..Default::default()
        }
    }

    /// Use an explicit endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Handle to the broker.
///
/// Constructed once by the composition root and cloned into every producer
/// and worker; clones share the same underlying connection.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Surreal<Any>,
}

impl Database {
    /// Connect to the broker and make sure the schema exists.
    pub async fn connect(config: DbConfig) -> Result<Self, DbError> {
        tracing::info!("Connecting to broker: {}", config.endpoint);

        let db = connect(&config.endpoint).await?;

        // Authenticate if credentials provided
        if let Some((username, password)) = &config.credentials {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        tracing::info!(
            "Connected to broker: {}/{}",
            config.namespace,
            config.database
        );

        let database = Self { inner: db };
        init_schema(&database).await?;
        Ok(database)
    }

    /// The raw SurrealDB client.
    pub fn conn(&self) -> &Surreal<Any> {
        &self.inner
    }
}
