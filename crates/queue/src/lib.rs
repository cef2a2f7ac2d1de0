//! Durable job queue.
//!
//! Jobs are JSON payloads grouped by kind and stored through a [`Transport`]
//! (SQLite in practice). Delivery is at-least-once: handlers must be
//! idempotent, since a crash between finishing the work and recording it
//! means the job runs again.
//!
//! # Lifecycle
//! - **Claim**: a consumer moves a queued job to active and starts its handler.
//! - **Heartbeat**: while the handler runs, the job's heartbeat is refreshed;
//!   [`Queue::watch_stuck`] re-queues active jobs whose heartbeat went quiet.
//! - **Retry**: retryable failures are re-queued with exponential backoff
//!   until the job runs out of attempts.
//! - **Shutdown**: consumers stop claiming, wait out a grace period, then abort
//!   and release whatever is left.

pub mod error;
mod queue;
pub mod transport;

pub use crate::queue::{ConsumeOptions, Failure, Handler, Queue, QueueOptions};
pub use crate::transport::{Job, JobState, JobStatus, NewJob, SqliteTransport, Transport, TransportHandle};
