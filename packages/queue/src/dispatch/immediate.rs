//! Memory driver: run handlers on the tokio runtime right away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::future::{BoxFuture, FutureExt};
use queue_core::QueueDriver;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use super::{Dispatch, EnqueueOptions, Enqueued, check_payload};
use crate::QueueError;
use crate::handler::{HandlerRegistry, run_handler};

/// Fire-and-forget dispatcher.
///
/// Failures are logged and dropped. At most `concurrency` handlers run at once; shutdown
/// waits for accepted jobs except those still sleeping out a delay.
pub struct ImmediateDispatch {
    handlers: Arc<HandlerRegistry>,
    shared: Arc<Shared>,
}

struct Shared {
    permits: Semaphore,
    running: AtomicUsize,
    closed: AtomicBool,
    closing: Notify,
    drained: Notify,
}

impl Shared {
    fn finish(&self) {
        if self.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl ImmediateDispatch {
    pub fn new(handlers: Arc<HandlerRegistry>, concurrency: u32) -> Self {
        Self {
            handlers,
            shared: Arc::new(Shared {
                permits: Semaphore::new(concurrency.max(1) as usize),
                running: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                closing: Notify::new(),
                drained: Notify::new(),
            }),
        }
    }

    fn spawn(&self, job_type: String, payload: Value, options: EnqueueOptions) -> Enqueued {
        let Some(handler) = self.handlers.get(&job_type) else {
            tracing::warn!("No handler registered for job type {}; skipping", job_type);
            return Enqueued::Skipped;
        };

        let shared = self.shared.clone();
        shared.running.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            if let Some(delay) = options.delay {
                let closing = shared.closing.notified();
                if !shared.closed.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = closing => {}
                    }
                }
                if shared.closed.load(Ordering::SeqCst) {
                    tracing::debug!("Dropping delayed {} job at shutdown", job_type);
                    shared.finish();
                    return;
                }
            }

            if let Ok(_permit) = shared.permits.acquire().await
                && let Err(error) = run_handler(handler, payload).await
            {
                tracing::warn!("Job {} failed: {}", job_type, error);
            }
            shared.finish();
        });

        Enqueued::Spawned
    }
}

impl Dispatch for ImmediateDispatch {
    fn driver(&self) -> QueueDriver {
        QueueDriver::Memory
    }

    fn enqueue<'a>(
        &'a self,
        job_type: &'a str,
        payload: Value,
        options: EnqueueOptions,
    ) -> BoxFuture<'a, Result<Enqueued, QueueError>> {
        async move {
            check_payload(job_type, &payload)?;
            if self.shared.closed.load(Ordering::SeqCst) {
                tracing::warn!("Queue is shutting down; ignoring {} job", job_type);
                return Ok(Enqueued::Skipped);
            }
            Ok(self.spawn(job_type.to_string(), payload, options))
        }
        .boxed()
    }

    fn in_flight(&self) -> BoxFuture<'_, Result<usize, QueueError>> {
        let running = self.shared.running.load(Ordering::SeqCst);
        async move { Ok(running) }.boxed()
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        async move {
            self.shared.closed.store(true, Ordering::SeqCst);
            self.shared.closing.notify_waiters();
            loop {
                let drained = self.shared.drained.notified();
                if self.shared.running.load(Ordering::SeqCst) == 0 {
                    break;
                }
                drained.await;
            }
            Ok(())
        }
        .boxed()
    }
}
