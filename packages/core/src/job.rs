//! Job record types for units of work in the task queue.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for `available_at` and a free worker.
    #[default]
    Pending,
    /// Claimed by a worker; `locked_at` holds the claim instant.
    Processing,
    /// Handler returned successfully.
    Completed,
    /// Attempts exhausted.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse a status string, as produced by [`JobStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted unit of work.
///
/// Records are created by the durable dispatcher and afterwards only change through the
/// transition methods below, each applied by the store as a conditional update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Type of job (used for routing to handlers).
    pub job_type: String,
    /// Job payload, always a JSON object.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// The job must not be claimed before this instant.
    pub available_at: DateTime<Utc>,
    /// When a worker claimed the job.
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    /// Reason of the most recent failure.
    #[serde(default)]
    pub error_message: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new pending job, available immediately.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            available_at: now,
            locked_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Delay the first execution of this job.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.available_at = shift(self.created_at, delay);
        self
    }

    /// Whether the job may be claimed at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at <= now
    }

    /// The record after a worker claimed it at `now`.
    pub fn claimed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Processing,
            locked_at: Some(now),
            updated_at: now,
            ..self.clone()
        }
    }

    /// The record after its handler succeeded.
    pub fn completed(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Completed,
            locked_at: None,
            error_message: None,
            updated_at: now,
            ..self.clone()
        }
    }

    /// The record after its handler failed with `error`.
    ///
    /// Returns to `pending` with `available_at` pushed back by `backoff(attempts)` while
    /// attempts remain, otherwise becomes `failed`.
    pub fn failed_attempt(
        &self,
        error: impl Into<String>,
        max_attempts: u32,
        backoff: &crate::BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let attempts = self.attempts.saturating_add(1);
        let mut next = Self {
            attempts,
            locked_at: None,
            error_message: Some(error.into()),
            updated_at: now,
            ..self.clone()
        };

        if attempts < max_attempts {
            next.status = JobStatus::Pending;
            next.available_at = shift(now, backoff.delay(attempts));
        } else {
            next.status = JobStatus::Failed;
        }

        next
    }

    /// The record after an operator asked for a fresh retry.
    pub fn reset_for_retry(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Pending,
            attempts: 0,
            available_at: now,
            locked_at: None,
            error_message: None,
            updated_at: now,
            ..self.clone()
        }
    }

    /// The record after its claim was given up without running the handler.
    pub fn released(&self, now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Pending,
            locked_at: None,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// `at + duration`, saturating at the latest representable instant.
pub fn shift(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
