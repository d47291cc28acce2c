//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Table holding one row per job record.
pub const JOB_TABLE: &str = "task_job";

/// Initialize the database schema.
///
/// This creates the job table and the indexes used by claiming and listing.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Timestamps are Unix milliseconds so that claim and sweep predicates compare numbers.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS task_job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON task_job TYPE string;
DEFINE FIELD IF NOT EXISTS job_type ON task_job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON task_job TYPE string;
DEFINE FIELD IF NOT EXISTS attempts ON task_job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS available_at ON task_job TYPE int;
DEFINE FIELD IF NOT EXISTS created_at ON task_job TYPE int;
DEFINE FIELD IF NOT EXISTS updated_at ON task_job TYPE int;

-- Claim polling: pending jobs by availability
DEFINE INDEX IF NOT EXISTS task_job_status_available ON task_job FIELDS status, available_at;
DEFINE INDEX IF NOT EXISTS task_job_type ON task_job FIELDS job_type;
DEFINE INDEX IF NOT EXISTS task_job_created ON task_job FIELDS created_at;
"#;
