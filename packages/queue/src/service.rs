//! Queue facade combining the dispatcher, the processor and introspection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{DbConfig, DbError, Expected, InMemoryJobStore, JobRepository, JobStore};
use queue_core::payloads::{
    AnalyticsKpiOptions, AnalyticsKpiPayload, InventoryMaintenanceOptions,
    InventoryMaintenancePayload, OrderAccountingPayload,
};
use queue_core::{
    JobFilter, JobId, JobPayload, JobRecord, JobStatus, JobSummary, QueueDriver, QueueSettings,
    QueueStats,
};
use ractor::{Actor, ActorRef};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::dispatch::{Dispatch, DurableDispatch, EnqueueOptions, Enqueued, ImmediateDispatch};
use crate::handler::{HandlerRegistry, HandlerResult, JobHandler};
use crate::messages::ProcessorMessage;
use crate::processor_actor::{ProcessorActor, ProcessorArgs};
use crate::{CALL_TIMEOUT, QueueError, call_processor, parse_job_id};

/// Reloads attempted when a retry races with another writer.
const RETRY_RACE_LIMIT: usize = 3;

struct DurableBackend {
    store: Arc<dyn JobStore>,
    processor: ActorRef<ProcessorMessage>,
    handle: JoinHandle<()>,
}

impl DurableBackend {
    fn wake(&self) {
        if let Err(e) = self.processor.cast(ProcessorMessage::Process) {
            tracing::warn!("Queue processor is not running: {}", e);
        }
    }
}

/// The task queue.
///
/// Built once at start-up from [`QueueSettings`]; the driver cannot change afterwards.
pub struct TaskQueue {
    settings: QueueSettings,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatch>,
    durable: Option<DurableBackend>,
}

impl TaskQueue {
    /// Start a queue.
    ///
    /// The durable driver runs its processor over `store`; without one it falls back to an
    /// in-process store whose jobs do not survive a restart.
    pub async fn start(
        settings: QueueSettings,
        handlers: Arc<HandlerRegistry>,
        store: Option<Arc<dyn JobStore>>,
    ) -> Result<Self, QueueError> {
        let (dispatcher, durable) = match settings.driver {
            QueueDriver::Memory => {
                let dispatcher: Arc<dyn Dispatch> =
                    Arc::new(ImmediateDispatch::new(handlers.clone(), settings.concurrency));
                (dispatcher, None)
            }
            QueueDriver::Durable => {
                let store = store.unwrap_or_else(|| {
                    tracing::warn!("Durable driver started without a store; using process memory");
                    let fallback: Arc<dyn JobStore> = InMemoryJobStore::arc();
                    fallback
                });

                let args = ProcessorArgs {
                    store: store.clone(),
                    handlers: handlers.clone(),
                    settings: settings.clone(),
                };
                let (processor, handle) = Actor::spawn(None, ProcessorActor, args)
                    .await
                    .map_err(|e| QueueError::Actor(format!("Failed to spawn processor: {}", e)))?;

                let dispatcher: Arc<dyn Dispatch> = Arc::new(DurableDispatch::new(
                    store.clone(),
                    processor.clone(),
                    handlers.clone(),
                    settings.unknown_type,
                ));
                let backend = DurableBackend {
                    store,
                    processor,
                    handle,
                };
                (dispatcher, Some(backend))
            }
        };

        tracing::info!(
            "Task queue started with {} driver (concurrency {})",
            settings.driver,
            settings.concurrency
        );

        Ok(Self {
            settings,
            handlers,
            dispatcher,
            durable,
        })
    }

    /// Start a memory-driver queue with default settings.
    pub async fn in_memory(handlers: Arc<HandlerRegistry>) -> Result<Self, QueueError> {
        Self::start(QueueSettings::default(), handlers, None).await
    }

    /// Start a queue, connecting to SurrealDB when the durable driver is selected.
    pub async fn connect(
        settings: QueueSettings,
        handlers: Arc<HandlerRegistry>,
        db_config: &DbConfig,
    ) -> Result<Self, QueueError> {
        let store: Option<Arc<dyn JobStore>> = match settings.driver {
            QueueDriver::Durable => {
                let db = db::init(db_config).await?;
                Some(Arc::new(JobRepository::new(db)))
            }
            QueueDriver::Memory => None,
        };

        Self::start(settings, handlers, store).await
    }

    pub fn driver(&self) -> QueueDriver {
        self.settings.driver
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Register a handler; pending jobs of its type become claimable.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: impl JobHandler) {
        self.handlers.register(job_type, handler);
        self.wake();
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register_fn(job_type, handler);
        self.wake();
    }

    /// Remove the handler for a job type; its pending jobs wait until one is registered again.
    pub fn unregister_handler(&self, job_type: &str) -> bool {
        self.handlers.unregister(job_type)
    }

    /// Enqueue a job to run as soon as possible.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Value,
    ) -> Result<Enqueued, QueueError> {
        self.enqueue_with(job_type, payload, EnqueueOptions::default())
            .await
    }

    /// Enqueue a job with options.
    pub async fn enqueue_with(
        &self,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Enqueued, QueueError> {
        self.dispatcher.enqueue(job_type, payload, options).await
    }

    /// Enqueue a typed payload under its job type.
    pub async fn enqueue_payload<P: JobPayload>(
        &self,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Enqueued, QueueError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        self.enqueue_with(P::JOB_TYPE, payload, options).await
    }

    pub async fn enqueue_order_accounting(
        &self,
        order_id: impl Into<String>,
        tenant_id: impl Into<String>,
        trigger: Option<String>,
    ) -> Result<Enqueued, QueueError> {
        let payload = OrderAccountingPayload::new(order_id, tenant_id, trigger);
        self.enqueue_payload(&payload, EnqueueOptions::default())
            .await
    }

    pub async fn enqueue_inventory_maintenance(
        &self,
        inventory_id: impl Into<String>,
        tenant_id: impl Into<String>,
        options: InventoryMaintenanceOptions,
    ) -> Result<Enqueued, QueueError> {
        let payload = InventoryMaintenancePayload::new(inventory_id, tenant_id, options);
        self.enqueue_payload(&payload, EnqueueOptions::default())
            .await
    }

    pub async fn enqueue_analytics_kpi(
        &self,
        tenant_id: impl Into<String>,
        options: AnalyticsKpiOptions,
    ) -> Result<Enqueued, QueueError> {
        let payload = AnalyticsKpiPayload::new(tenant_id, options);
        self.enqueue_payload(&payload, EnqueueOptions::default())
            .await
    }

    /// Reset a job to a fresh pending state with zero attempts.
    pub async fn retry_job(&self, id: JobId) -> Result<JobRecord, QueueError> {
        let backend = self.backend("retry_job")?;

        for _ in 0..RETRY_RACE_LIMIT {
            let job = backend
                .store
                .get(id)
                .await?
                .ok_or(QueueError::JobNotFound(id))?;

            let next = job.reset_for_retry(Utc::now());
            if let Some(written) = backend
                .store
                .update_if(&next, Expected::lock_of(&job))
                .await?
            {
                tracing::info!(
                    "Job {} ({}) reset for retry from {}",
                    id,
                    job.job_type,
                    job.status
                );
                backend.wake();
                return Ok(written);
            }
        }

        Err(DbError::Query(format!("job {} kept changing during retry", id)).into())
    }

    pub async fn retry_job_str(&self, id: &str) -> Result<JobRecord, QueueError> {
        self.retry_job(parse_job_id(id)?).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<JobRecord, QueueError> {
        let backend = self.backend("get_job")?;
        backend
            .store
            .get(id)
            .await?
            .ok_or(QueueError::JobNotFound(id))
    }

    pub async fn get_job_str(&self, id: &str) -> Result<JobRecord, QueueError> {
        self.get_job(parse_job_id(id)?).await
    }

    /// List jobs ordered by creation time; always empty for the memory driver.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, QueueError> {
        match &self.durable {
            Some(backend) => Ok(backend.store.list(filter).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Like [`TaskQueue::list_jobs`], summarized for display.
    pub async fn list_summaries(&self, filter: &JobFilter) -> Result<Vec<JobSummary>, QueueError> {
        let jobs = self.list_jobs(filter).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    pub async fn count_pending(&self) -> Result<u64, QueueError> {
        self.count_by_status(JobStatus::Pending).await
    }

    pub async fn count_by_status(&self, status: JobStatus) -> Result<u64, QueueError> {
        match &self.durable {
            Some(backend) => Ok(backend.store.count(status).await?),
            None => Ok(0),
        }
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats {
            driver: self.settings.driver,
            concurrency: self.settings.concurrency,
            max_attempts: self.settings.max_attempts,
            in_flight: self.dispatcher.in_flight().await? as u64,
            supports_persistence: self.durable.is_some(),
            ..Default::default()
        };

        if let Some(backend) = &self.durable {
            let store = &backend.store;
            stats.pending = store.count(JobStatus::Pending).await?;
            stats.processing = store.count(JobStatus::Processing).await?;
            stats.completed = store.count(JobStatus::Completed).await?;
            stats.failed = store.count(JobStatus::Failed).await?;
            stats.next_available_at = store.next_available_at().await?;
            stats.last_failure_at = store.last_failure_at().await?;
        }

        Ok(stats)
    }

    /// Delete completed jobs last updated more than `older_than` ago.
    pub async fn purge_completed(&self, older_than: Duration) -> Result<u64, QueueError> {
        self.purge(JobStatus::Completed, Some(older_than)).await
    }

    /// Delete jobs in a terminal `status`, optionally only those older than `older_than`.
    pub async fn purge(
        &self,
        status: JobStatus,
        older_than: Option<Duration>,
    ) -> Result<u64, QueueError> {
        let backend = self.backend("purge")?;
        if !status.is_terminal() {
            return Err(QueueError::InvalidPurgeStatus(status));
        }

        let now = Utc::now();
        let threshold = older_than.map(|age| before(now, age));
        let purged = backend.store.purge(status, threshold).await?;

        tracing::info!("Purged {} {} job(s)", purged, status);
        Ok(purged)
    }

    pub async fn delete_job(&self, id: JobId) -> Result<(), QueueError> {
        let backend = self.backend("delete_job")?;
        if backend.store.delete(id).await? {
            tracing::info!("Deleted job {}", id);
            Ok(())
        } else {
            Err(QueueError::JobNotFound(id))
        }
    }

    pub async fn delete_job_str(&self, id: &str) -> Result<(), QueueError> {
        self.delete_job(parse_job_id(id)?).await
    }

    /// Release stale locks now instead of waiting for the next sweep.
    ///
    /// Returns the number of released jobs; always 0 for the memory driver.
    pub async fn sweep_stale_locks(&self) -> Result<u64, QueueError> {
        let Some(backend) = &self.durable else {
            return Ok(0);
        };

        call_processor(
            &backend.processor,
            |reply| ProcessorMessage::SweepStaleLocks { reply: Some(reply) },
            Some(CALL_TIMEOUT),
        )
        .await?
        .map_err(QueueError::Actor)
    }

    /// Stop accepting jobs, wait for running handlers, then stop the processor.
    pub async fn shutdown(self) -> Result<(), QueueError> {
        tracing::info!("Shutting down task queue");

        self.dispatcher.shutdown().await?;
        if let Some(backend) = self.durable {
            backend
                .handle
                .await
                .map_err(|e| QueueError::Actor(format!("Processor task failed: {}", e)))?;
        }

        tracing::info!("Task queue stopped");
        Ok(())
    }

    fn backend(&self, operation: &'static str) -> Result<&DurableBackend, QueueError> {
        self.durable
            .as_ref()
            .ok_or(QueueError::UnsupportedDriver { operation })
    }

    fn wake(&self) {
        if let Some(backend) = &self.durable {
            backend.wake();
        }
    }
}

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
