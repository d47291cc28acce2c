//! Message types for actor communication.

use queue_core::JobRecord;
use ractor::RpcReplyPort;

/// Messages for the ProcessorActor.
#[derive(Debug)]
pub enum ProcessorMessage {
    /// Claim eligible jobs until every worker is busy.
    Process,

    /// Poll tick; same as `Process`.
    Tick,

    /// A worker's handler succeeded.
    JobSucceeded { job: Box<JobRecord>, worker_id: usize },

    /// A worker's handler failed or panicked.
    JobFailed {
        job: Box<JobRecord>,
        worker_id: usize,
        error: String,
    },

    /// A worker found no handler for its job.
    JobReleased { job: Box<JobRecord>, worker_id: usize },

    /// Reset stale locks; replies with the number of released jobs when asked.
    SweepStaleLocks {
        reply: Option<RpcReplyPort<Result<u64, String>>>,
    },

    /// Number of jobs currently executing on this processor.
    InFlight { reply: RpcReplyPort<usize> },

    /// Stop claiming, wait for running jobs, then stop.
    Shutdown { reply: RpcReplyPort<()> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run the handler for a claimed job.
    Execute { job: Box<JobRecord> },

    /// Shutdown the worker.
    Shutdown,
}
