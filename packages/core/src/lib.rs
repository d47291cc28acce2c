//! Core domain types for the task queue.
//!
//! This crate contains shared types used across all packages:
//! - JobRecord and JobStatus for persisted work items
//! - QueueSettings, QueueDriver and BackoffPolicy for start-up configuration
//! - Typed payloads for the application's job types
//! - QueueStats, JobFilter and JobSummary for introspection

mod job;
pub mod payloads;
mod settings;
mod stats;

pub use job::{JobId, JobRecord, JobStatus, shift};
pub use payloads::JobPayload;
pub use settings::{BackoffPolicy, QueueDriver, QueueSettings, UnknownTypePolicy};
pub use stats::{JobFilter, JobSummary, QueueStats, summarize_payload};
