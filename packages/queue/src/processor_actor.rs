//! Processor actor that claims durable jobs and records their outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{Expected, JobStore};
use queue_core::{JobRecord, JobStatus, QueueSettings};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};
use tokio::task::JoinHandle;

use crate::handler::HandlerRegistry;
use crate::messages::{ProcessorMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Processor actor arguments.
pub struct ProcessorArgs {
    pub store: Arc<dyn JobStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub settings: QueueSettings,
}

/// State for the processor actor.
pub struct ProcessorState {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    settings: QueueSettings,
    /// Workers by index.
    workers: Vec<ActorRef<WorkerMessage>>,
    /// Indexes of workers without a job.
    idle: Vec<usize>,
    /// Claimed job of each busy worker, keyed by worker index.
    ///
    /// A swept job may be claimed again while its first run is still going, so one job ID can
    /// be running on two workers at once.
    in_flight: HashMap<usize, JobRecord>,
    /// Set once shutdown was requested; no further claims.
    draining: bool,
    shutdown_waiters: Vec<RpcReplyPort<()>>,
    timers: Vec<JoinHandle<()>>,
}

impl ProcessorState {
    /// Claim jobs for idle workers until none are idle or nothing is eligible.
    async fn process(&mut self) {
        if self.draining {
            return;
        }

        while let Some(&worker_id) = self.idle.last() {
            let job_types = self.handlers.job_types();
            if job_types.is_empty() {
                return;
            }

            let job = match self.store.claim_next(&job_types, Utc::now()).await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!("Failed to claim a job: {}", e);
                    return;
                }
            };

            tracing::debug!(
                "Claimed job {} ({}) for worker {}",
                job.id,
                job.job_type,
                worker_id
            );

            let Some(worker) = self.workers.get(worker_id) else {
                self.release(&job).await;
                return;
            };

            if let Err(e) = worker.send_message(WorkerMessage::Execute {
                job: Box::new(job.clone()),
            }) {
                tracing::warn!("Worker {} is unavailable: {}", worker_id, e);
                self.idle.pop();
                self.release(&job).await;
                continue;
            }

            self.idle.pop();
            self.in_flight.insert(worker_id, job);
        }
    }

    /// Mark a worker idle again after it reported back.
    fn finish(&mut self, worker_id: usize) {
        self.in_flight.remove(&worker_id);
        if !self.idle.contains(&worker_id) {
            self.idle.push(worker_id);
        }
    }

    /// Write `next` if this processor still holds the claim on `claimed`.
    async fn settle(&self, claimed: &JobRecord, next: &JobRecord) -> Option<JobRecord> {
        match self.store.update_if(next, Expected::lock_of(claimed)).await {
            Ok(Some(written)) => Some(written),
            Ok(None) => {
                tracing::warn!(
                    "Lost the lock on job {} before recording its outcome; leaving it as is",
                    claimed.id
                );
                None
            }
            Err(e) => {
                tracing::warn!("Failed to record outcome of job {}: {}", claimed.id, e);
                None
            }
        }
    }

    async fn release(&self, claimed: &JobRecord) {
        let next = claimed.released(Utc::now());
        if self.settle(claimed, &next).await.is_some() {
            tracing::warn!(
                "No handler for job type {}; released job {}",
                claimed.job_type,
                claimed.id
            );
        }
    }

    async fn sweep(&self) -> Result<u64, String> {
        let now = Utc::now();
        let cutoff = stale_cutoff(now, self.settings.stale_lock_timeout);

        let released = self
            .store
            .release_stale(cutoff, now)
            .await
            .map_err(|e| e.to_string())?;

        if released > 0 {
            tracing::warn!(
                "Released {} job(s) locked before {}",
                released,
                cutoff.to_rfc3339()
            );
        }

        Ok(released)
    }

    /// Stop once drained, answering everyone waiting on shutdown.
    fn stop_if_drained(&mut self, myself: &ActorRef<ProcessorMessage>) {
        if !self.draining || !self.in_flight.is_empty() {
            return;
        }

        for worker in &self.workers {
            let _ = worker.send_message(WorkerMessage::Shutdown);
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }

        tracing::info!("Queue processor stopped");
        myself.stop(None);
    }
}

/// Instant before which a lock counts as stale.
fn stale_cutoff(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Send `message()` to `actor` every `period`, starting immediately, until the actor is gone.
fn every(
    actor: ActorRef<ProcessorMessage>,
    period: Duration,
    message: fn() -> ProcessorMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if actor.send_message(message()).is_err() {
                break;
            }
        }
    })
}

/// Processor actor owning a pool of worker actors.
///
/// Every state change it makes is a conditional store update, so any number of processors
/// may share one store.
pub struct ProcessorActor;

impl Actor for ProcessorActor {
    type Msg = ProcessorMessage;
    type State = ProcessorState;
    type Arguments = ProcessorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let concurrency = args.settings.concurrency.max(1) as usize;
        tracing::info!(
            "Starting queue processor with {} worker(s), max {} attempt(s)",
            concurrency,
            args.settings.max_attempts
        );

        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency {
            let worker_args = WorkerArgs {
                worker_id,
                processor: myself.clone(),
                handlers: args.handlers.clone(),
            };
            let (worker, _handle) =
                Actor::spawn_linked(None, WorkerActor, worker_args, myself.get_cell())
                    .await
                    .map_err(|e| {
                        ActorProcessingErr::from(format!("Failed to spawn worker: {}", e))
                    })?;
            workers.push(worker);
        }

        // Both intervals fire immediately, so the first sweep and pass run at start.
        let timers = vec![
            every(myself.clone(), args.settings.sweep_interval, || {
                ProcessorMessage::SweepStaleLocks { reply: None }
            }),
            every(myself.clone(), args.settings.poll_interval, || {
                ProcessorMessage::Tick
            }),
        ];

        Ok(ProcessorState {
            store: args.store,
            handlers: args.handlers,
            settings: args.settings,
            idle: (0..concurrency).rev().collect(),
            workers,
            in_flight: HashMap::new(),
            draining: false,
            shutdown_waiters: Vec::new(),
            timers,
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProcessorMessage::Process | ProcessorMessage::Tick => {
                state.process().await;
            }

            ProcessorMessage::JobSucceeded { job, worker_id } => {
                state.finish(worker_id);

                let next = job.completed(Utc::now());
                if state.settle(&job, &next).await.is_some() {
                    tracing::debug!("Job {} ({}) completed", job.id, job.job_type);
                }

                state.stop_if_drained(&myself);
                state.process().await;
            }

            ProcessorMessage::JobFailed {
                job,
                worker_id,
                error,
            } => {
                state.finish(worker_id);

                let next = job.failed_attempt(
                    error.as_str(),
                    state.settings.max_attempts,
                    &state.settings.backoff,
                    Utc::now(),
                );
                if let Some(written) = state.settle(&job, &next).await {
                    if written.status == JobStatus::Failed {
                        tracing::error!(
                            "Job {} ({}) failed permanently after {} attempt(s): {}",
                            job.id,
                            job.job_type,
                            written.attempts,
                            error
                        );
                    } else {
                        tracing::warn!(
                            "Job {} ({}) failed (attempt {}/{}), retrying at {}: {}",
                            job.id,
                            job.job_type,
                            written.attempts,
                            state.settings.max_attempts,
                            written.available_at.to_rfc3339(),
                            error
                        );
                    }
                }

                state.stop_if_drained(&myself);
                state.process().await;
            }

            ProcessorMessage::JobReleased { job, worker_id } => {
                state.finish(worker_id);
                state.release(&job).await;
                state.stop_if_drained(&myself);
            }

            ProcessorMessage::SweepStaleLocks { reply } => {
                let result = state.sweep().await;
                if let Err(e) = &result {
                    tracing::warn!("Stale lock sweep failed: {}", e);
                }
                let released = result.as_ref().copied().unwrap_or(0);

                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                if released > 0 {
                    state.process().await;
                }
            }

            ProcessorMessage::InFlight { reply } => {
                let _ = reply.send(state.in_flight.len());
            }

            ProcessorMessage::Shutdown { reply } => {
                if !state.draining {
                    tracing::info!(
                        "Shutting down queue processor, waiting for {} job(s)",
                        state.in_flight.len()
                    );
                }
                state.draining = true;
                state.shutdown_waiters.push(reply);
                state.stop_if_drained(&myself);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, reason) => {
                tracing::error!("Worker actor {} failed: {}", cell.get_id(), reason);
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) if !state.draining => {
                tracing::warn!("Worker actor {} terminated: {:?}", cell.get_id(), reason);
            }
            _ => {}
        }
        Ok(())
    }
}
