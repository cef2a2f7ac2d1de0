use async_trait::async_trait;
use derive_more::Display;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{ErrorKind, Result};
use crate::transport::{Job, JobState, NewJob, TransportHandle};

const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Queue-wide timings and retry policy.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Runs a job gets (the first included) before it is marked failed.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with every further attempt.
    pub backoff: Duration,
    /// How long an idle consumer waits before polling for work again.
    pub poll_interval: Duration,
    /// How often a running job reports that it is still alive. Must be well
    /// below the stuck timeout.
    pub heartbeat_interval: Duration,
    /// How long in-flight jobs may keep running after shutdown is requested.
    pub shutdown_grace: Duration,
    /// Longest a single run may take. A handler still running after this is
    /// dropped and the run counts as a retryable failure.
    pub job_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(5),
            job_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-consumer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub concurrency: usize,
    /// Strict FIFO: the oldest unfinished job blocks the rest of its kind.
    pub ordered: bool,
}

impl ConsumeOptions {
    pub fn concurrent(concurrency: usize) -> Self {
        Self { concurrency, ordered: false }
    }

    pub fn ordered() -> Self {
        Self { concurrency: 1, ordered: true }
    }
}

/// Why a handler gave up on a job.
#[derive(Debug, Display)]
#[display("{message}")]
pub struct Failure {
    pub message: String,
    /// Retryable failures go back in the queue with a backoff; the rest are
    /// final.
    pub retryable: bool,
}

impl Failure {
    pub fn retry(message: impl ToString) -> Self {
        Self { message: message.to_string(), retryable: true }
    }

    pub fn fatal(message: impl ToString) -> Self {
        Self { message: message.to_string(), retryable: false }
    }
}

/// Processes jobs of one kind.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Run a job. `Some` result is stored and handed to the next scheduled
    /// job of the same kind.
    async fn handle(&self, job: &Job) -> std::result::Result<Option<Value>, Failure>;
}

/// Producer and consumer side of the job queue.
///
/// Cheap to clone; clones share the transport and wake each other's idle
/// consumers when work is enqueued in this process.
#[derive(Clone)]
pub struct Queue {
    transport: TransportHandle,
    options: QueueOptions,
    wake: Arc<Notify>,
}

impl Queue {
    pub fn new(transport: TransportHandle, options: QueueOptions) -> Self {
        Self {
            transport,
            options,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    fn new_job(&self, kind: &str, payload: &impl Serialize) -> Result<NewJob> {
        Ok(NewJob {
            kind: kind.to_string(),
            payload: serde_json::to_value(payload).or_raise(|| ErrorKind::Payload)?,
            max_attempts: self.options.max_attempts,
        })
    }

    // ========================================================================
    // Producing
    // ========================================================================

    pub async fn enqueue(&self, kind: &str, payload: &impl Serialize) -> Result<i64> {
        let id = self.transport.enqueue(self.new_job(kind, payload)?).await?;
        self.wake.notify_waiters();
        Ok(id)
    }

    /// Enqueue a batch atomically.
    pub async fn enqueue_all<T: Serialize>(&self, kind: &str, payloads: impl IntoIterator<Item = T>) -> Result<usize> {
        let jobs = payloads
            .into_iter()
            .map(|payload| self.new_job(kind, &payload))
            .collect::<Result<Vec<_>>>()?;
        if jobs.is_empty() {
            return Ok(0);
        }
        let ids = self.transport.enqueue_all(jobs).await?;
        self.wake.notify_waiters();
        Ok(ids.len())
    }

    /// Whether a job of this kind is queued or running.
    pub async fn exists(&self, kind: &str) -> Result<bool> {
        self.transport.exists(kind).await
    }

    pub async fn last_result<T: DeserializeOwned>(&self, kind: &str) -> Result<Option<T>> {
        self.transport
            .last_result(kind)
            .await?
            .map(|value| serde_json::from_value(value).or_raise(|| ErrorKind::Payload))
            .transpose()
    }

    // ========================================================================
    // Consuming
    // ========================================================================

    /// Claim and run jobs of `kind` until `shutdown` is cancelled.
    ///
    /// Once cancelled, no new jobs are claimed and running ones get the
    /// shutdown grace period to finish. Anything still running after that is
    /// aborted and released back to the queue.
    pub async fn consume<H>(&self, kind: &str, options: ConsumeOptions, handler: Arc<H>, shutdown: CancellationToken) -> Result<()>
    where
        H: Handler + ?Sized,
    {
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let in_flight: Arc<Mutex<HashSet<(i64, u32)>>> = Arc::default();
        let mut running = JoinSet::new();
        info!(kind, concurrency = options.concurrency, ordered = options.ordered, "consumer started");

        loop {
            while let Some(joined) = running.try_join_next() {
                reap(joined);
            }
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => permit.or_raise(|| ErrorKind::Closed)?,
            };
            let job = match self.transport.claim(kind, options.ordered).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    self.idle(&shutdown).await;
                    continue;
                },
                Err(err) if err.is_retryable() => {
                    warn!(kind, error = %err, "failed to claim job");
                    drop(permit);
                    self.idle(&shutdown).await;
                    continue;
                },
                Err(err) => return Err(err),
            };

            let run = (job.id, job.attempts);
            in_flight.lock().await.insert(run);
            let span = info_span!("job", kind = %job.kind, id = job.id, attempt = job.attempts);
            let queue = self.clone();
            let handler = Arc::clone(&handler);
            let in_flight = Arc::clone(&in_flight);
            running.spawn(
                async move {
                    queue.run(job, &*handler).await;
                    in_flight.lock().await.remove(&run);
                    drop(permit);
                }
                .instrument(span),
            );
        }

        self.drain(running, in_flight).await;
        info!(kind, "consumer stopped");
        Ok(())
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = self.wake.notified() => {},
            _ = sleep(self.options.poll_interval) => {},
            _ = shutdown.cancelled() => {},
        }
    }

    async fn run<H>(&self, job: Job, handler: &H)
    where
        H: Handler + ?Sized,
    {
        let period = self.options.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // A timed-out handler is dropped with this block, before the run is
        // recorded.
        let outcome = {
            let work = handler.handle(&job);
            let deadline = sleep(self.options.job_timeout);
            tokio::pin!(work, deadline);
            loop {
                tokio::select! {
                    outcome = &mut work => break outcome,
                    _ = &mut deadline => {
                        warn!(timeout = ?self.options.job_timeout, "job timed out, abandoning run");
                        break Err(Failure::retry(format!("timed out after {:?}", self.options.job_timeout)));
                    },
                    _ = heartbeat.tick() => {
                        if let Err(err) = self.transport.heartbeat(job.id, job.attempts).await {
                            warn!(error = %err, "failed to record heartbeat");
                        }
                    },
                }
            }
        };

        let recorded = match outcome {
            Ok(result) => {
                debug!("job completed");
                self.transport.complete(job.id, job.attempts, result.as_ref()).await
            },
            Err(failure) => {
                let retry_after = failure.retryable.then(|| self.backoff(job.attempts));
                self.transport
                    .fail(job.id, job.attempts, &failure.message, retry_after)
                    .await
                    .map(|state| match state {
                        JobState::Queued => warn!(error = %failure, retry_in = ?retry_after, "job failed, will retry"),
                        _ => error!(error = %failure, "job failed permanently"),
                    })
            },
        };
        match recorded {
            Ok(()) => {},
            Err(err) if matches!(&*err, ErrorKind::NotHeld { .. }) => {
                warn!("job was reclaimed by another run, discarding this outcome");
            },
            // The heartbeat has stopped, so the stuck sweep will pick it up.
            Err(err) => error!(error = %err, "failed to record job outcome"),
        }
    }

    /// Delay before retrying a job that has just failed its `attempts`-th run.
    fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.options.backoff.saturating_mul(1 << exponent).min(MAX_BACKOFF)
    }

    async fn drain(&self, mut running: JoinSet<()>, in_flight: Arc<Mutex<HashSet<(i64, u32)>>>) {
        let grace = sleep(self.options.shutdown_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(joined) => reap(joined),
                    None => break,
                },
                _ = &mut grace => {
                    warn!(remaining = running.len(), "shutdown grace period elapsed, aborting jobs");
                    running.abort_all();
                    break;
                },
            }
        }
        while let Some(joined) = running.join_next().await {
            reap(joined);
        }

        let interrupted: Vec<(i64, u32)> = in_flight.lock().await.drain().collect();
        for (id, attempt) in interrupted {
            match self.transport.release(id, attempt).await {
                Ok(()) => info!(id, "released interrupted job"),
                Err(err) => error!(id, error = %err, "failed to release interrupted job"),
            }
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Periodically re-queue jobs whose heartbeat is older than `timeout`,
    /// until `shutdown` is cancelled.
    pub async fn watch_stuck(&self, timeout: Duration, shutdown: CancellationToken) -> Result<()> {
        let every = (timeout / 4).max(self.options.poll_interval);
        loop {
            match self.transport.requeue_stuck(timeout).await {
                Ok(0) => {},
                Ok(count) => {
                    warn!(count, "re-queued stuck jobs");
                    self.wake.notify_waiters();
                },
                Err(err) if err.is_retryable() => warn!(error = %err, "stuck job sweep failed"),
                Err(err) => return Err(err),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(every) => {},
            }
        }
    }

    /// Enqueue a job of `kind` every `interval`, unless one is already queued
    /// or running, until `shutdown` is cancelled.
    ///
    /// `seed` receives the result of the last completed job of the kind and
    /// returns the payload for the next one, or `None` to skip this round.
    pub async fn schedule<F, Fut>(&self, kind: &str, interval: Duration, seed: F, shutdown: CancellationToken) -> Result<()>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync,
        Fut: Future<Output = Option<Value>> + Send,
    {
        loop {
            match self.tick(kind, &seed).await {
                Ok(_) => {},
                Err(err) if err.is_retryable() => warn!(kind, error = %err, "failed to schedule job"),
                Err(err) => return Err(err),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(interval) => {},
            }
        }
    }

    async fn tick<F, Fut>(&self, kind: &str, seed: &F) -> Result<bool>
    where
        F: Fn(Option<Value>) -> Fut,
        Fut: Future<Output = Option<Value>>,
    {
        if self.transport.exists(kind).await? {
            debug!(kind, "scheduled job already pending");
            return Ok(false);
        }
        let last = self.transport.last_result(kind).await?;
        let Some(payload) = seed(last).await else {
            return Ok(false);
        };
        let id = self.enqueue(kind, &payload).await?;
        debug!(kind, id, "scheduled job");
        Ok(true)
    }
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(err) = joined
        && err.is_panic()
    {
        error!(error = %err, "job handler panicked");
    }
}
