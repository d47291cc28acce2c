use db::{Database, DbConfig, DbError, JobRepository};

/// Fresh in-memory datastore with the job schema applied.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(&DbConfig::memory()).await
}

pub async fn setup_repo() -> Result<JobRepository, DbError> {
    Ok(JobRepository::new(setup_db().await?))
}
