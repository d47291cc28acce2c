//! Durable driver: persist jobs and wake the processor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use db::JobStore;
use futures_util::future::{BoxFuture, FutureExt};
use queue_core::{JobRecord, QueueDriver, UnknownTypePolicy};
use ractor::ActorRef;
use serde_json::Value;

use super::{Dispatch, EnqueueOptions, Enqueued, check_payload};
use crate::handler::HandlerRegistry;
use crate::messages::ProcessorMessage;
use crate::{CALL_TIMEOUT, QueueError, call_processor};

/// Dispatcher writing pending jobs for the processor to claim.
pub struct DurableDispatch {
    store: Arc<dyn JobStore>,
    processor: ActorRef<ProcessorMessage>,
    handlers: Arc<HandlerRegistry>,
    unknown_type: UnknownTypePolicy,
    closed: AtomicBool,
}

impl DurableDispatch {
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: ActorRef<ProcessorMessage>,
        handlers: Arc<HandlerRegistry>,
        unknown_type: UnknownTypePolicy,
    ) -> Self {
        Self {
            store,
            processor,
            handlers,
            unknown_type,
            closed: AtomicBool::new(false),
        }
    }

    /// Ask the processor for a pass; a stopped processor is only logged.
    fn wake(&self) {
        if let Err(e) = self.processor.cast(ProcessorMessage::Process) {
            tracing::warn!("Queue processor is not running: {}", e);
        }
    }

    async fn persist(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Enqueued, QueueError> {
        check_payload(job_type, &payload)?;

        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!("Queue is shutting down; ignoring {} job", job_type);
            return Ok(Enqueued::Skipped);
        }

        if !self.handlers.has_handler(job_type) {
            match self.unknown_type {
                UnknownTypePolicy::Reject => {
                    return Err(QueueError::NoHandler(job_type.to_string()));
                }
                UnknownTypePolicy::Pending => {
                    tracing::warn!(
                        "No handler registered for job type {}; job stays pending until one is",
                        job_type
                    );
                }
            }
        }

        let mut job = JobRecord::new(job_type, payload);
        if let Some(delay) = options.delay {
            job = job.with_delay(delay);
        }

        let job = self.store.insert(&job).await?;
        tracing::debug!("Enqueued job {} ({})", job.id, job.job_type);

        self.wake();
        Ok(Enqueued::Persisted(job.id))
    }
}

impl Dispatch for DurableDispatch {
    fn driver(&self) -> QueueDriver {
        QueueDriver::Durable
    }

    fn enqueue<'a>(
        &'a self,
        job_type: &'a str,
        payload: Value,
        options: EnqueueOptions,
    ) -> BoxFuture<'a, Result<Enqueued, QueueError>> {
        self.persist(job_type, payload, options).boxed()
    }

    fn in_flight(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        call_processor(
            &self.processor,
            |reply| ProcessorMessage::InFlight { reply },
            Some(CALL_TIMEOUT),
        )
        .boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        async move {
            self.closed.store(true, Ordering::SeqCst);
            // No timeout: running handlers are waited for.
            call_processor(
                &self.processor,
                |reply| ProcessorMessage::Shutdown { reply },
                None,
            )
            .await
        }
        .boxed()
    }
}
