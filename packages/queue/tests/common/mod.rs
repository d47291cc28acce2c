#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use db::JobStore;
use queue_core::{BackoffPolicy, JobId, JobRecord, QueueSettings};
use task_queue::HandlerRegistry;

const WAIT_LIMIT: Duration = Duration::from_secs(10);
const WAIT_STEP: Duration = Duration::from_millis(10);

/// Durable settings with short intervals so tests finish quickly.
pub fn fast_settings() -> QueueSettings {
    QueueSettings::durable()
        .with_concurrency(2)
        .with_max_attempts(3)
        .with_backoff(BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ))
        .with_poll_interval(Duration::from_millis(20))
        .with_stale_lock_timeout(Duration::from_secs(60))
        .with_sweep_interval(Duration::from_secs(60))
}

/// Register a handler for `job_type` that counts calls and succeeds.
pub fn counting(registry: &HandlerRegistry, job_type: &str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    registry.register_fn(job_type, move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    calls
}

/// Register a handler for `job_type` that counts calls and always fails.
pub fn failing(registry: &HandlerRegistry, job_type: &str, reason: &'static str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    registry.register_fn(job_type, move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!(reason))
        }
    });
    calls
}

/// Poll the store until the job satisfies `done`.
pub async fn wait_for_job<S>(
    store: &S,
    id: JobId,
    done: impl Fn(&JobRecord) -> bool,
) -> Result<JobRecord, Box<dyn Error>>
where
    S: JobStore + ?Sized,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        if let Some(job) = store.get(id).await?
            && done(&job)
        {
            return Ok(job);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("job {} did not reach the expected state", id).into());
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
}

/// Poll until `counter` reaches `expected`.
pub async fn wait_for_calls(counter: &AtomicUsize, expected: usize) -> Result<(), Box<dyn Error>> {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while counter.load(Ordering::SeqCst) < expected {
        if tokio::time::Instant::now() >= deadline {
            return Err(format!(
                "expected {} calls, saw {}",
                expected,
                counter.load(Ordering::SeqCst)
            )
            .into());
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
    Ok(())
}
