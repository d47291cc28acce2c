//! Enqueue front-ends for the two drivers.

mod durable;
mod immediate;

use std::time::Duration;

use futures_util::future::BoxFuture;
use queue_core::{JobId, QueueDriver};
use serde_json::Value;

use crate::QueueError;

pub use durable::DurableDispatch;
pub use immediate::ImmediateDispatch;

/// Options accepted by [`Dispatch::enqueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Earliest start, relative to the enqueue instant.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

/// What happened to an enqueued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Running in-process; nothing was persisted.
    Spawned,
    /// Dropped: no handler under the memory driver, or the queue is shutting down.
    Skipped,
    /// Written to the store as a pending job.
    Persisted(JobId),
}

impl Enqueued {
    /// The job id, when one was persisted.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Persisted(id) => Some(*id),
            _ => None,
        }
    }
}

/// Accepts jobs on behalf of a driver.
pub trait Dispatch: Send + Sync + 'static {
    fn driver(&self) -> QueueDriver;

    /// Hand a job to the driver without waiting for it to run.
    fn enqueue<'a>(
        &'a self,
        job_type: &'a str,
        payload: Value,
        options: EnqueueOptions,
    ) -> BoxFuture<'a, Result<Enqueued, QueueError>>;

    /// Handlers currently executing.
    fn in_flight(&self) -> BoxFuture<'_, Result<usize, QueueError>>;

    /// Refuse new jobs and wait for running handlers to return.
    fn shutdown(&self) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// Payloads are JSON objects.
pub(crate) fn check_payload(job_type: &str, payload: &Value) -> Result<(), QueueError> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(QueueError::InvalidPayload(format!(
            "payload for {} must be a JSON object",
            job_type
        )))
    }
}
