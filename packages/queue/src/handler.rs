//! Job handler trait and registry.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use queue_core::JobPayload;
use serde_json::Value;

/// Result type for job handlers.
pub type HandlerResult = anyhow::Result<()>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// A handler receives the job payload verbatim. Returning an error (or panicking) counts as a
/// failed attempt.
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, payload: Value) -> HandlerFuture;
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, payload: Value) -> HandlerFuture {
        (self.handler)(payload)
    }
}

/// Registry mapping job types to handlers.
///
/// Shared as `Arc<HandlerRegistry>` between the dispatcher and the processor; handlers may be
/// added after the queue started.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type, replacing any previous one.
    pub fn register(&self, job_type: impl Into<String>, handler: impl JobHandler) {
        let job_type = job_type.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type.clone(), Arc::new(handler));

        if previous.is_some() {
            tracing::warn!("Handler for job type {} was replaced", job_type);
        } else {
            tracing::debug!("Registered handler for job type {}", job_type);
        }
    }

    /// Register an async closure taking the raw payload.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(
            job_type,
            FnHandler::new(move |payload| Box::pin(handler(payload)) as HandlerFuture),
        );
    }

    /// Register an async closure for a typed payload under its job type.
    ///
    /// A payload that does not decode into `P` fails the attempt.
    pub fn register_payload<P, F, Fut>(&self, handler: F)
    where
        P: JobPayload,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_fn(P::JOB_TYPE, move |payload| {
            let handler = handler.clone();
            async move {
                let payload: P = serde_json::from_value(payload).map_err(|e| {
                    anyhow::anyhow!("invalid {} payload: {}", P::JOB_TYPE, e)
                })?;
                handler(payload).await
            }
        });
    }

    /// Remove the handler for a job type, returning whether one was registered.
    ///
    /// Jobs of that type already claimed are released back to pending.
    pub fn unregister(&self, job_type: &str) -> bool {
        let removed = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_type)
            .is_some();

        if removed {
            tracing::info!("Unregistered handler for job type {}", job_type);
        }
        removed
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_type)
    }

    /// List all registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }
}

/// Run a handler to completion, turning errors and panics into a failure reason.
pub(crate) async fn run_handler(handler: Arc<dyn JobHandler>, payload: Value) -> Result<(), String> {
    let outcome = AssertUnwindSafe(async move { handler.handle(payload).await })
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
