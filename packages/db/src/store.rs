//! Job store abstraction.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use queue_core::{JobFilter, JobId, JobRecord, JobStatus};

use crate::DbError;

/// Expected pre-image for a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: JobStatus,
    /// Claim instant the writer holds; `None` matches any lock.
    pub locked_at: Option<DateTime<Utc>>,
}

impl Expected {
    /// Match on status alone.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            locked_at: None,
        }
    }

    /// Match the claim recorded on `job`.
    pub fn lock_of(job: &JobRecord) -> Self {
        Self {
            status: job.status,
            locked_at: job.locked_at,
        }
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        job.status == self.status
            && self
                .locked_at
                .is_none_or(|lock| job.locked_at == Some(lock))
    }
}

/// Storage for job records.
///
/// Every state change goes through [`JobStore::update_if`] or [`JobStore::claim_next`],
/// which write a single record only when its current state matches the expected pre-image.
/// Concurrent processors, in this process or another, rely on nothing else.
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new job.
    fn insert(&self, job: &JobRecord) -> BoxFuture<'_, Result<JobRecord, DbError>>;

    /// Get a job by ID.
    fn get(&self, id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>, DbError>>;

    /// Replace the stored job with `next` if the stored state matches `expected`.
    ///
    /// Returns the written record, or `None` when the precondition did not hold.
    fn update_if(
        &self,
        next: &JobRecord,
        expected: Expected,
    ) -> BoxFuture<'_, Result<Option<JobRecord>, DbError>>;

    /// Claim the oldest available pending job of one of `job_types`.
    ///
    /// Sets `status = processing` and `locked_at = now` on exactly one record, or returns
    /// `None` when nothing is eligible.
    fn claim_next<'a>(
        &'a self,
        job_types: &'a [String],
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<JobRecord>, DbError>>;

    /// Reset `processing` jobs locked before `cutoff` back to `pending`.
    ///
    /// Returns the number of jobs released.
    fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, DbError>>;

    /// List jobs ordered by creation time.
    fn list<'a>(&'a self, filter: &'a JobFilter) -> BoxFuture<'a, Result<Vec<JobRecord>, DbError>>;

    /// Count jobs in `status`.
    fn count(&self, status: JobStatus) -> BoxFuture<'_, Result<u64, DbError>>;

    /// Earliest `available_at` among pending jobs.
    fn next_available_at(&self) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, DbError>>;

    /// Most recent `updated_at` among failed jobs.
    fn last_failure_at(&self) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, DbError>>;

    /// Delete a job. Returns whether it existed.
    fn delete(&self, id: JobId) -> BoxFuture<'_, Result<bool, DbError>>;

    /// Delete jobs in `status` last updated at or before `older_than`.
    ///
    /// Returns the number of deleted jobs.
    fn purge(
        &self,
        status: JobStatus,
        older_than: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<u64, DbError>>;
}
