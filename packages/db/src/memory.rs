//! In-process job store for tests and single-node development.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, ready};
use queue_core::{JobFilter, JobId, JobRecord, JobStatus};

use crate::DbError;
use crate::store::{Expected, JobStore};

/// Job store backed by a map behind a lock.
///
/// The lock makes each conditional update a compare-and-swap; nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_now(&self, job: &JobRecord) -> Result<JobRecord, DbError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(DbError::Query(format!("Job already exists: {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    fn update_if_now(&self, next: &JobRecord, expected: Expected) -> Option<JobRecord> {
        let mut jobs = self.write();
        let current = jobs.get_mut(&next.id)?;
        if !expected.matches(current) {
            return None;
        }
        *current = next.clone();
        Some(next.clone())
    }

    fn claim_now(&self, job_types: &[String], now: DateTime<Utc>) -> Option<JobRecord> {
        let mut jobs = self.write();

        let id = jobs
            .values()
            .filter(|j| j.is_claimable(now) && job_types.contains(&j.job_type))
            .min_by_key(|j| (j.available_at, j.created_at, j.id))
            .map(|j| j.id)?;

        let job = jobs.get_mut(&id)?;
        *job = job.claimed(now);
        Some(job.clone())
    }

    fn release_stale_now(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
        let mut released = 0;
        for job in self.write().values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.locked_at.is_some_and(|lock| lock < cutoff);
            if stale {
                *job = job.released(now);
                released += 1;
            }
        }
        released
    }

    fn list_now(&self, filter: &JobFilter) -> Vec<JobRecord> {
        let mut result: Vec<_> = self
            .read()
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.into_iter().skip(filter.skip).take(filter.limit).collect()
    }

    fn purge_now(&self, status: JobStatus, older_than: Option<DateTime<Utc>>) -> u64 {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.status == status && older_than.is_none_or(|threshold| j.updated_at <= threshold))
        });
        (before - jobs.len()) as u64
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: &JobRecord) -> BoxFuture<'_, Result<JobRecord, DbError>> {
        ready(self.insert_now(job)).boxed()
    }

    fn get(&self, id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>, DbError>> {
        ready(Ok(self.read().get(&id).cloned())).boxed()
    }

    fn update_if(
        &self,
        next: &JobRecord,
        expected: Expected,
    ) -> BoxFuture<'_, Result<Option<JobRecord>, DbError>> {
        ready(Ok(self.update_if_now(next, expected))).boxed()
    }

    fn claim_next<'a>(
        &'a self,
        job_types: &'a [String],
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Option<JobRecord>, DbError>> {
        ready(Ok(self.claim_now(job_types, now))).boxed()
    }

    fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<u64, DbError>> {
        ready(Ok(self.release_stale_now(cutoff, now))).boxed()
    }

    fn list<'a>(&'a self, filter: &'a JobFilter) -> BoxFuture<'a, Result<Vec<JobRecord>, DbError>> {
        ready(Ok(self.list_now(filter))).boxed()
    }

    fn count(&self, status: JobStatus) -> BoxFuture<'_, Result<u64, DbError>> {
        let count = self.read().values().filter(|j| j.status == status).count();
        ready(Ok(count as u64)).boxed()
    }

    fn next_available_at(&self) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, DbError>> {
        let next = self
            .read()
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.available_at)
            .min();
        ready(Ok(next)).boxed()
    }

    fn last_failure_at(&self) -> BoxFuture<'_, Result<Option<DateTime<Utc>>, DbError>> {
        let last = self
            .read()
            .values()
            .filter(|j| j.status == JobStatus::Failed)
            .map(|j| j.updated_at)
            .max();
        ready(Ok(last)).boxed()
    }

    fn delete(&self, id: JobId) -> BoxFuture<'_, Result<bool, DbError>> {
        ready(Ok(self.write().remove(&id).is_some())).boxed()
    }

    fn purge(
        &self,
        status: JobStatus,
        older_than: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, Result<u64, DbError>> {
        ready(Ok(self.purge_now(status, older_than))).boxed()
    }
}
