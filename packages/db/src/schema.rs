//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes. Safe to run on
/// every connect.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing broker schema...");

    db.conn().query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Broker schema initialized");

    Ok(())
}

/// Job table schema. Times are epoch milliseconds so they compare as numbers.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS queue ON job TYPE string;
DEFINE FIELD IF NOT EXISTS name ON job TYPE string;
DEFINE FIELD IF NOT EXISTS payload ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string DEFAULT "queued";
DEFINE FIELD IF NOT EXISTS attempts ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS max_attempts ON job TYPE int DEFAULT 3;
DEFINE FIELD IF NOT EXISTS idempotency_key ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS last_error ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS result ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS run_at_ms ON job TYPE int;
DEFINE FIELD IF NOT EXISTS lease_until_ms ON job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS worker_id ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS enqueued_at_ms ON job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at_ms ON job TYPE int;
DEFINE FIELD IF NOT EXISTS completed_at_ms ON job TYPE option<int>;
-- "key/<queue>/<key>" while a keyed job is active, "done/<job_id>" otherwise
DEFINE FIELD IF NOT EXISTS active_key ON job TYPE string;

-- Polling: claimable jobs in a queue by due time
DEFINE INDEX IF NOT EXISTS job_queue_state_run ON job FIELDS queue, state, run_at_ms;
-- Deduplication lookups
DEFINE INDEX IF NOT EXISTS job_idempotency ON job FIELDS queue, idempotency_key;
-- At most one active job per idempotency key
DEFINE INDEX IF NOT EXISTS job_active_key ON job FIELDS active_key UNIQUE;
DEFINE INDEX IF NOT EXISTS job_name ON job FIELDS name;
"#;
