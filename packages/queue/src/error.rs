//! Queue error type.

use db::DbError;
use queue_core::{JobId, JobStatus};
use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{operation} is not supported by the memory driver")]
    UnsupportedDriver { operation: &'static str },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No handler registered for job type: {0}")]
    NoHandler(String),

    #[error("Only completed or failed jobs can be purged, got {0}")]
    InvalidPurgeStatus(JobStatus),

    #[error("Store error: {0}")]
    Store(#[from] DbError),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl QueueError {
    /// Whether the caller misused the API, as opposed to an infrastructure failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Actor(_))
    }
}

/// Parse a job id received as text.
pub fn parse_job_id(raw: &str) -> Result<JobId, QueueError> {
    JobId::parse(raw.trim()).map_err(|_| QueueError::InvalidJobId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_distinguished() {
        assert!(QueueError::UnsupportedDriver { operation: "retry_job" }.is_client_error());
        assert!(QueueError::JobNotFound(JobId::new()).is_client_error());
        assert!(QueueError::InvalidPurgeStatus(JobStatus::Pending).is_client_error());
        assert!(!QueueError::Actor("gone".into()).is_client_error());
        assert!(!QueueError::Store(DbError::Query("boom".into())).is_client_error());
    }

    #[test]
    fn job_ids_parse_from_text() {
        let id = JobId::new();
        assert_eq!(parse_job_id(&id.to_string()).ok(), Some(id));
        assert!(matches!(
            parse_job_id("not-a-ulid"),
            Err(QueueError::InvalidJobId(raw)) if raw == "not-a-ulid"
        ));
    }
}
