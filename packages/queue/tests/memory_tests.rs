mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use queue_core::{JobFilter, JobId, JobStatus, QueueDriver, QueueSettings};
use serde_json::json;
use task_queue::{
    Dispatch, EnqueueOptions, Enqueued, HandlerRegistry, ImmediateDispatch, QueueError, TaskQueue,
};
use tokio::sync::Semaphore;

use common::{counting, failing, wait_for_calls};

#[tokio::test]
async fn enqueue_returns_before_the_handler_finishes() -> Result<(), Box<dyn Error>> {
    let handlers = Arc::new(HandlerRegistry::new());
    let gate = Arc::new(Semaphore::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let (gate_in, started_in, finished_in) = (gate.clone(), started.clone(), finished.clone());
    handlers.register_fn("order-accounting", move |payload| {
        let gate = gate_in.clone();
        let started = started_in.clone();
        let finished = finished_in.clone();
        async move {
            anyhow::ensure!(
                payload
                    == json!({
                        "orderId": "order-123",
                        "tenantId": "tenant-456",
                        "trigger": "manual",
                    }),
                "unexpected payload {}",
                payload
            );
            started.fetch_add(1, Ordering::SeqCst);
            let _permit = gate.acquire().await?;
            finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    let queue = TaskQueue::in_memory(handlers).await?;
    assert_eq!(queue.driver(), QueueDriver::Memory);

    let enqueued = queue
        .enqueue_order_accounting("order-123", "tenant-456", Some("manual".to_string()))
        .await?;
    assert_eq!(enqueued, Enqueued::Spawned);
    assert_eq!(enqueued.job_id(), None);
    assert!(!finished.load(Ordering::SeqCst));

    wait_for_calls(&started, 1).await?;
    assert_eq!(queue.stats().await?.in_flight, 1);

    gate.add_permits(1);
    queue.shutdown().await?;

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(started.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_types_are_skipped() -> Result<(), Box<dyn Error>> {
    let queue = TaskQueue::in_memory(Arc::new(HandlerRegistry::new())).await?;

    let enqueued = queue.enqueue("nobody-home", json!({})).await?;
    assert_eq!(enqueued, Enqueued::Skipped);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn failures_are_not_retried() -> Result<(), Box<dyn Error>> {
    let handlers = Arc::new(HandlerRegistry::new());
    let calls = failing(&handlers, "flaky", "upstream unavailable");
    let queue = TaskQueue::in_memory(handlers).await?;

    queue.enqueue("flaky", json!({})).await?;
    wait_for_calls(&calls, 1).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn introspection_reports_the_memory_driver() -> Result<(), Box<dyn Error>> {
    let queue = TaskQueue::in_memory(Arc::new(HandlerRegistry::new())).await?;
    let id = JobId::new();

    let err = queue.retry_job(id).await.err().ok_or("expected an error")?;
    assert!(matches!(err, QueueError::UnsupportedDriver { operation: "retry_job" }));
    assert!(err.is_client_error());

    assert!(matches!(
        queue.get_job(id).await,
        Err(QueueError::UnsupportedDriver { .. })
    ));
    assert!(matches!(
        queue.delete_job(id).await,
        Err(QueueError::UnsupportedDriver { .. })
    ));
    assert!(matches!(
        queue.purge_completed(Duration::from_secs(60)).await,
        Err(QueueError::UnsupportedDriver { .. })
    ));

    assert!(queue.list_jobs(&JobFilter::default()).await?.is_empty());
    assert_eq!(queue.count_pending().await?, 0);
    assert_eq!(queue.count_by_status(JobStatus::Failed).await?, 0);
    assert_eq!(queue.sweep_stale_locks().await?, 0);

    let stats = queue.stats().await?;
    assert_eq!(stats.driver, QueueDriver::Memory);
    assert!(!stats.supports_persistence);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.pending, 0);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn delayed_jobs_wait_before_running() -> Result<(), Box<dyn Error>> {
    let handlers = Arc::new(HandlerRegistry::new());
    let calls = counting(&handlers, "echo");
    let queue = TaskQueue::in_memory(handlers).await?;

    let enqueued = queue
        .enqueue_with("echo", json!({}), EnqueueOptions::delay(Duration::from_millis(200)))
        .await?;
    assert_eq!(enqueued, Enqueued::Spawned);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    wait_for_calls(&calls, 1).await?;
    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn concurrency_bounds_running_handlers() -> Result<(), Box<dyn Error>> {
    let handlers = Arc::new(HandlerRegistry::new());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let (running_in, peak_in, done_in) = (running.clone(), peak.clone(), done.clone());
    handlers.register_fn("busy", move |_| {
        let running = running_in.clone();
        let peak = peak_in.clone();
        let done = done_in.clone();
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let settings = QueueSettings::default().with_concurrency(2);
    let queue = TaskQueue::start(settings, handlers, None).await?;
    for n in 0..8 {
        queue.enqueue("busy", json!({ "n": n })).await?;
    }

    wait_for_calls(&done, 8).await?;
    assert!(peak.load(Ordering::SeqCst) <= 2);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn dispatcher_ignores_jobs_after_shutdown() -> Result<(), Box<dyn Error>> {
    let handlers = Arc::new(HandlerRegistry::new());
    let calls = counting(&handlers, "echo");
    let dispatch = ImmediateDispatch::new(handlers, 1);

    assert_eq!(
        dispatch.enqueue("echo", json!({}), EnqueueOptions::default()).await?,
        Enqueued::Spawned
    );
    dispatch.shutdown().await?;
    wait_for_calls(&calls, 1).await?;

    assert_eq!(
        dispatch.enqueue("echo", json!({}), EnqueueOptions::default()).await?,
        Enqueued::Skipped
    );
    let err = dispatch
        .enqueue("echo", json!("text"), EnqueueOptions::default())
        .await
        .err()
        .ok_or("expected an error")?;
    assert!(matches!(err, QueueError::InvalidPayload(_)));
    Ok(())
}
