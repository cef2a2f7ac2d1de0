//! The storage seam underneath the [`Queue`](crate::Queue).
//!
//! A transport only moves rows between states; retry policy, heartbeating and
//! shutdown live in the queue itself.

mod sqlite;

use async_trait::async_trait;
use exn::ResultExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorKind, Result};

pub use self::sqlite::{JobStatus, SqliteTransport};

/// Shared handle to a transport.
pub type TransportHandle = Arc<dyn Transport + Send + Sync>;

/// Lifecycle of a job row.
///
/// `queued → active → completed`, or `active → queued` again on a retryable
/// failure, a lost heartbeat or an interrupted shutdown. `failed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

/// A job waiting to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: String,
    pub payload: Value,
    pub max_attempts: u32,
}

/// A job handed out by [`Transport::claim`].
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub kind: String,
    pub payload: Value,
    /// Includes the current run.
    pub attempts: u32,
    pub max_attempts: u32,
}

impl Job {
    /// Deserialize the payload into its typed form.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).or_raise(|| ErrorKind::Payload)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Insert a job, returning its id.
    async fn enqueue(&self, job: NewJob) -> Result<i64>;

    /// Insert several jobs atomically: either all of them become visible or
    /// none do. Ids come back in input order.
    async fn enqueue_all(&self, jobs: Vec<NewJob>) -> Result<Vec<i64>>;

    /// Whether any job of this kind is queued or active.
    async fn exists(&self, kind: &str) -> Result<bool>;

    /// Move the next runnable job of this kind to `active`.
    ///
    /// With `ordered`, only the oldest unfinished job of the kind is eligible,
    /// so a job waiting out its retry backoff holds back everything behind it.
    async fn claim(&self, kind: &str, ordered: bool) -> Result<Option<Job>>;

    // The methods below act on one run of a job, identified by the job id
    // and `attempt`, the job's attempt count as claimed. Once the job has
    // been re-queued and claimed again, the old run can no longer touch it.

    /// Record that an active run's handler is still making progress. A no-op
    /// for runs that no longer hold the job.
    async fn heartbeat(&self, id: i64, attempt: u32) -> Result<()>;

    /// Finish a run. Jobs without a result are removed; a result is kept (only
    /// the newest per kind) for [`Transport::last_result`].
    ///
    /// Raises [`ErrorKind::NotHeld`] if the run no longer holds the job.
    async fn complete(&self, id: i64, attempt: u32, result: Option<&Value>) -> Result<()>;

    /// Record a failed run. With `retry_after`, the job is queued again after
    /// that delay unless it has used up its attempts. Returns the new state.
    ///
    /// Raises [`ErrorKind::NotHeld`] if the run no longer holds the job.
    async fn fail(&self, id: i64, attempt: u32, error: &str, retry_after: Option<Duration>) -> Result<JobState>;

    /// Return an active job to the queue without counting the run. A no-op
    /// for runs that no longer hold the job.
    async fn release(&self, id: i64, attempt: u32) -> Result<()>;

    /// Re-queue active jobs whose last heartbeat is older than `timeout`.
    async fn requeue_stuck(&self, timeout: Duration) -> Result<u64>;

    /// The result of the newest completed job of this kind.
    async fn last_result(&self, kind: &str) -> Result<Option<Value>>;
}
