//! Introspection types: queue statistics, listing filters and job summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{JobId, JobRecord, JobStatus, QueueDriver};

/// Statistics for the queue's current state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub driver: QueueDriver,
    pub concurrency: u32,
    pub max_attempts: u32,
    /// Number of pending jobs.
    pub pending: u64,
    /// Number of claimed jobs.
    pub processing: u64,
    /// Number of completed jobs still retained.
    pub completed: u64,
    /// Number of jobs that exhausted their attempts.
    pub failed: u64,
    /// Handlers currently running in this process.
    pub in_flight: u64,
    /// Earliest `available_at` among pending jobs.
    pub next_available_at: Option<DateTime<Utc>>,
    /// Most recent `updated_at` among failed jobs.
    pub last_failure_at: Option<DateTime<Utc>>,
    pub supports_persistence: bool,
}

impl QueueStats {
    /// Jobs not yet finished (pending + processing).
    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }

    /// Jobs that reached a terminal state.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}

/// Filter and pagination for listing jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: usize,
    pub skip: usize,
}

impl JobFilter {
    pub const DEFAULT_LIMIT: usize = 25;

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    /// Page size; zero means the default.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = if limit == 0 { Self::DEFAULT_LIMIT } else { limit };
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.job_type.as_deref().is_none_or(|t| job.job_type == t)
    }
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: Self::DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

/// Operator-facing view of a job with a shortened payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub available_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload_summary: Map<String, Value>,
    pub supports_retry: bool,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            status: job.status,
            attempts: job.attempts,
            available_at: job.available_at,
            locked_at: job.locked_at,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            payload_summary: summarize_payload(&job.payload),
            supports_retry: job.status == JobStatus::Failed,
        }
    }
}

const MAX_SUMMARY_CHARS: usize = 80;

/// Shorten a payload for display: long strings are truncated, nested values collapsed.
pub fn summarize_payload(payload: &Value) -> Map<String, Value> {
    let Value::Object(fields) = payload else {
        return Map::new();
    };

    fields
        .iter()
        .map(|(key, value)| {
            let summary = match value {
                Value::String(s) if s.chars().count() > MAX_SUMMARY_CHARS => {
                    let head: String = s.chars().take(MAX_SUMMARY_CHARS - 3).collect();
                    Value::String(format!("{head}..."))
                }
                Value::Array(items) => Value::String(format!("[{} items]", items.len())),
                Value::Object(inner) => Value::String(format!("{{{} keys}}", inner.len())),
                other => other.clone(),
            };
            (key.clone(), summary)
        })
        .collect()
}
