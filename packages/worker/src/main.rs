//! Task queue worker process.
//!
//! Reads queue settings and the SurrealDB location from the environment, registers the
//! application's handlers and processes jobs until interrupted.

mod handlers;

use std::sync::Arc;

use db::DbConfig;
use queue_core::{QueueDriver, QueueSettings};
use task_queue::TaskQueue;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = QueueSettings::from_env();
    if settings.driver == QueueDriver::Memory {
        tracing::warn!(
            "Running with the memory driver; set {}=durable to persist jobs",
            QueueSettings::DRIVER_VAR
        );
    }

    let handlers = Arc::new(handlers::registry());
    tracing::info!("Registered job types: {}", handlers.job_types().join(", "));

    let queue = TaskQueue::connect(settings, handlers, &DbConfig::from_env()).await?;
    let stats = queue.stats().await?;
    tracing::info!(
        "Queue ready: {} pending, {} processing, {} failed",
        stats.pending,
        stats.processing,
        stats.failed
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");

    queue.shutdown().await?;
    Ok(())
}
