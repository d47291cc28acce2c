//! Worker actor for executing jobs.

use std::sync::Arc;

use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::handler::{HandlerRegistry, run_handler};
use crate::messages::{ProcessorMessage, WorkerMessage};

/// State for the worker actor.
pub struct WorkerActorState {
    /// Index of this worker within its processor.
    pub worker_id: usize,
    /// Processor that hands out jobs and records outcomes.
    pub processor: ActorRef<ProcessorMessage>,
    /// Handler registry.
    pub handlers: Arc<HandlerRegistry>,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: usize,
    pub processor: ActorRef<ProcessorMessage>,
    pub handlers: Arc<HandlerRegistry>,
}

/// Worker actor that executes one job at a time.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker {}", args.worker_id);

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            processor: args.processor,
            handlers: args.handlers,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Execute { job } => {
                let worker_id = state.worker_id;

                // The handler may have been unregistered since the claim.
                let Some(handler) = state.handlers.get(&job.job_type) else {
                    state
                        .processor
                        .send_message(ProcessorMessage::JobReleased { job, worker_id })?;
                    return Ok(());
                };

                tracing::debug!("Worker {} running job {} ({})", worker_id, job.id, job.job_type);

                match run_handler(handler, job.payload.clone()).await {
                    Ok(()) => {
                        state
                            .processor
                            .send_message(ProcessorMessage::JobSucceeded { job, worker_id })?;
                    }
                    Err(error) => {
                        state.processor.send_message(ProcessorMessage::JobFailed {
                            job,
                            worker_id,
                            error,
                        })?;
                    }
                }
            }

            WorkerMessage::Shutdown => {
                tracing::debug!("Shutting down worker {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
