//! SurrealDB job repository.

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use queue_core::{JobFilter, JobId, JobRecord, JobStatus};
use serde::{Deserialize, Serialize};

use crate::schema::JOB_TABLE;
use crate::store::{Expected, JobStore};
use crate::{Database, DbError};

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Stored shape of a job; timestamps are Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRow {
    job_id: String,
    job_type: String,
    payload: serde_json::Value,
    status: JobStatus,
    #[serde(default)]
    attempts: u32,
    available_at: i64,
    #[serde(default)]
    locked_at: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<&JobRecord> for JobRow {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            status: job.status,
            attempts: job.attempts,
            available_at: job.available_at.timestamp_millis(),
            locked_at: job.locked_at.map(|t| t.timestamp_millis()),
            error_message: job.error_message.clone(),
            created_at: job.created_at.timestamp_millis(),
            updated_at: job.updated_at.timestamp_millis(),
        }
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, DbError> {
        Ok(JobRecord {
            id: JobId::parse(&row.job_id)
                .map_err(|e| DbError::Serialization(format!("bad job id {}: {}", row.job_id, e)))?,
            job_type: row.job_type,
            payload: row.payload,
            status: row.status,
            attempts: row.attempts,
            available_at: from_millis(row.available_at)?,
            locked_at: row.locked_at.map(from_millis).transpose()?,
            error_message: row.error_message,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<JobRecord>, DbError> {
    rows.into_iter().map(JobRecord::try_from).collect()
}

fn first_job(rows: Vec<JobRow>) -> Result<Option<JobRecord>, DbError> {
    rows.into_iter().next().map(JobRecord::try_from).transpose()
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

#[derive(Deserialize)]
struct InstantResult {
    at: i64,
}

/// Full-row assignment shared by conditional updates.
const SET_ROW: &str = "status = $status, attempts = $attempts, available_at = $available_at, \
    locked_at = $locked_at, error_message = $error_message, updated_at = $updated_at";

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &JobRecord) -> Result<JobRecord, DbError> {
        let record: Option<JobRow> = self
            .db
            .create((JOB_TABLE, job.id.to_string()))
            .content(JobRow::from(job))
            .await?;

        record
            .map(JobRecord::try_from)
            .transpose()?
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn find(&self, id: JobId) -> Result<Option<JobRecord>, DbError> {
        let record: Option<JobRow> = self.db.select((JOB_TABLE, id.to_string())).await?;

        record.map(JobRecord::try_from).transpose()
    }

    /// Write `next` only if the stored row still matches `expected`.
    pub async fn compare_and_set(
        &self,
        next: &JobRecord,
        expected: Expected,
    ) -> Result<Option<JobRecord>, DbError> {
        let lock_clause = if expected.locked_at.is_some() {
            " AND locked_at = $expected_lock"
        } else {
            ""
        };
        let query = format!(
            "UPDATE type::thing($table, $id) SET {SET_ROW} \
             WHERE status = $expected_status{lock_clause} RETURN AFTER"
        );

        let row = JobRow::from(next);
        let mut response = self
            .db
            .query(query)
            .bind(("table", JOB_TABLE))
            .bind(("id", row.job_id.clone()))
            .bind(("status", row.status))
            .bind(("attempts", row.attempts))
            .bind(("available_at", row.available_at))
            .bind(("locked_at", row.locked_at))
            .bind(("error_message", row.error_message))
            .bind(("updated_at", row.updated_at))
            .bind(("expected_status", expected.status))
            .bind((
                "expected_lock",
                expected.locked_at.map(|t| t.timestamp_millis()),
            ))
            .await?;

        let rows: Vec<JobRow> = response.take(0)?;
        first_job(rows)
    }

    /// Claim one eligible job.
    ///
    /// Candidates are read first, then claimed one at a time with a conditional update so a
    /// candidate taken by another processor in between is skipped.
    pub async fn claim(
        &self,
        job_types: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, DbError> {
        const BATCH: i64 = 16;
        let now_ms = now.timestamp_millis();

        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM type::table($table)
                WHERE status = "pending" AND available_at <= $now AND job_type INSIDE $types
                ORDER BY available_at ASC, created_at ASC
                LIMIT $limit
                "#,
            )
            .bind(("table", JOB_TABLE))
            .bind(("now", now_ms))
            .bind(("types", job_types.to_vec()))
            .bind(("limit", BATCH))
            .await?;
        let candidates: Vec<JobRow> = response.take(0)?;

        for candidate in candidates {
            match self.try_claim(&candidate.job_id, now_ms).await {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => tracing::debug!("Job {} was claimed elsewhere", candidate.job_id),
                // Write conflicts surface as errors on some engines.
                Err(e) => tracing::warn!("Failed to claim job {}: {}", candidate.job_id, e),
            }
        }

        Ok(None)
    }

    async fn try_claim(&self, id: &str, now_ms: i64) -> Result<Option<JobRecord>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing($table, $id)
                SET status = "processing", locked_at = $now, updated_at = $now
                WHERE status = "pending" AND available_at <= $now
                RETURN AFTER
                "#,
            )
            .bind(("table", JOB_TABLE))
            .bind(("id", id.to_string()))
            .bind(("now", now_ms))
            .await?;

        let rows: Vec<JobRow> = response.take(0)?;
        first_job(rows)
    }

    /// Release jobs whose lock predates `cutoff`.
    pub async fn release_locked_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::table($table)
                SET status = "pending", locked_at = NONE, updated_at = $now
                WHERE status = "processing" AND locked_at < $cutoff
                RETURN AFTER
                "#,
            )
            .bind(("table", JOB_TABLE))
            .bind(("cutoff", cutoff.timestamp_millis()))
            .bind(("now", now.timestamp_millis()))
            .await?;

        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }

    /// List jobs with optional filtering.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, DbError> {
        let mut conditions = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = $status");
        }
        if filter.job_type.is_some() {
            conditions.push("job_type = $job_type");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT * FROM type::table($table) {} ORDER BY created_at ASC, job_id ASC LIMIT $limit START $start",
            where_clause
        );

        let mut response = self
            .db
            .query(query)
            .bind(("table", JOB_TABLE))
            .bind(("status", filter.status))
            .bind(("job_type", filter.job_type.clone()))
            .bind(("limit", filter.limit as i64))
            .bind(("start", filter.skip as i64))
            .await?;

        let rows: Vec<JobRow> = response.take(0)?;
        into_jobs(rows)
    }

    /// Count jobs in one status.
    pub async fn count_status(&self, status: JobStatus) -> Result<u64, DbError> {
        let mut response = self
            .db
            .query("SELECT count() FROM type::table($table) WHERE status = $status GROUP ALL")
            .bind(("table", JOB_TABLE))
            .bind(("status", status))
            .await?;

        let counts: Vec<CountResult> = response.take(0)?;
        Ok(counts.first().map_or(0, |c| c.count.max(0) as u64))
    }

    async fn extreme_instant(&self, query: &'static str) -> Result<Option<DateTime<Utc>>, DbError> {
        let mut response = self
            .db
            .query(query)
            .bind(("table", JOB_TABLE))
            .await?;

        let rows: Vec<InstantResult> = response.take(0)?;
        rows.first().map(|r| from_millis(r.at)).transpose()
    }

    /// Delete a job.
    pub async fn remove(&self, id: JobId) -> Result<bool, DbError> {
        let deleted: Option<JobRow> = self.db.delete((JOB_TABLE, id.to_string())).await?;

        Ok(deleted.is_some())
    }

    /// Delete jobs in `status`, optionally only those last updated at or before `older_than`.
    pub async fn remove_by_status(
        &self,
        status: JobStatus,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<u64, DbError> {
        let age_clause = if older_than.is_some() {
            " AND updated_at <= $threshold"
        } else {
            ""
        };
        let query = format!(
            "DELETE type::table($table) WHERE status = $status{age_clause} RETURN BEFORE"
        );

        let mut response = self
            .db
            .query(query)
            .bind(("table", JOB_TABLE))
            .bind(("status", status))
            .bind(("threshold", older_than.map(|t| t.timestamp_millis())))
            .await?;

        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }
}

impl JobStore for JobRepository {
    fn insert(&self, job: &JobRecord) -> BoxFuture<'_, Result<JobRecord, DbError>> {
        let job = job.clone();
        async move { self.create(&job).await }.boxed()
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>, DbError>> {
        self.find(id).boxed()
    }

    fn update_if(
        &self,
        next: &JobRecord,
        expected: Expected,
    ) -> BoxFuture<'_, Result<Option<JobRecord>, DbError>> {
        let next = next.clone();
        async move { self.compare_and_set(&next, expected).await }.boxed()
    }

    fn claim_next<'a>(
        &'a self,
        job_types: &'a [String],
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<JobRecord>, DbError>> {
        self.claim(job_types, now).boxed()
    }

    fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, DbError>> {
        self.release_locked_before(cutoff, now).boxed()
    }

    fn list<'a>(&'a self, filter: &'a JobFilter) -> BoxFuture<'a, Result<Vec<JobRecord>, DbError>> {
        self.list_jobs(filter).boxed()
    }

    fn count(&self, status: JobStatus) -> BoxFuture<'_, Result<u64, DbError>> {
        self.count_status(status).boxed()
    }

    fn next_available_at(&self) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, DbError>> {
        self.extreme_instant(
            r#"SELECT available_at AS at, created_at FROM type::table($table)
               WHERE status = "pending" ORDER BY at ASC, created_at ASC LIMIT 1"#,
        )
        .boxed()
    }

    fn last_failure_at(&self) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, DbError>> {
        self.extreme_instant(
            r#"SELECT updated_at AS at FROM type::table($table)
               WHERE status = "failed" ORDER BY at DESC LIMIT 1"#,
        )
        .boxed()
    }

    fn delete(&self, id: JobId) -> BoxFuture<'_, Result<bool, DbError>> {
        self.remove(id).boxed()
    }

    fn purge(
        &self,
        status: JobStatus,
        older_than: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<u64, DbError>> {
        self.remove_by_status(status, older_than).boxed()
    }
}
