//! Asynchronous task queue.
//!
//! Jobs are dispatched either in-process (`memory` driver) or persisted and processed by a
//! Ractor-based processor (`durable` driver).
//!
//! # Architecture
//!
//! - `TaskQueue` - Facade selected at start-up; enqueue and introspection
//! - `HandlerRegistry` - Maps job types to handlers
//! - `ImmediateDispatch` / `DurableDispatch` - Enqueue front-ends per driver
//! - `ProcessorActor` - Claims durable jobs and records their outcome
//! - `WorkerActor` - Executes one claimed job at a time
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use task_queue::{HandlerRegistry, TaskQueue};
//!
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register_fn("send-email", |payload| async move { Ok(()) });
//!
//! let queue = TaskQueue::start(QueueSettings::from_env(), handlers, Some(store)).await?;
//! queue.enqueue("send-email", json!({ "to": "ops@example.com" })).await?;
//! ```

mod dispatch;
mod error;
mod handler;
mod messages;
mod processor_actor;
mod service;
mod worker_actor;

use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{ActorRef, RpcReplyPort};

pub use dispatch::{Dispatch, DurableDispatch, EnqueueOptions, Enqueued, ImmediateDispatch};
pub use error::{QueueError, parse_job_id};
pub use handler::{FnHandler, HandlerFuture, HandlerRegistry, HandlerResult, JobHandler};
pub use messages::{ProcessorMessage, WorkerMessage};
pub use processor_actor::{ProcessorActor, ProcessorArgs};
pub use service::TaskQueue;
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, concurrency};

/// Upper bound for request/reply calls to the processor.
pub(crate) const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a request to the processor and wait for its reply.
pub(crate) async fn call_processor<T, F>(
    processor: &ActorRef<ProcessorMessage>,
    build: F,
    timeout: Option<Duration>,
) -> Result<T, QueueError>
where
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> ProcessorMessage,
{
    let result = ractor::rpc::call(processor, build, timeout)
        .await
        .map_err(|e| QueueError::Actor(e.to_string()))?;

    match result {
        CallResult::Success(value) => Ok(value),
        CallResult::Timeout => Err(QueueError::Actor("processor call timed out".into())),
        CallResult::SenderError => Err(QueueError::Actor("processor dropped the call".into())),
    }
}
