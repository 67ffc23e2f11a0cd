use db::{Database, DbConfig, DbError};

/// Every test gets its own in-memory broker.
pub async fn setup_db() -> Result<Database, DbError> {
    Database::connect(DbConfig::memory()).await
}
