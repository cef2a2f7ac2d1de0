//! Long-running coordinator: consumers, schedulers and the stuck-job sweep
//! for every configured upstream.

mod handler;

use serde_json::{Value, json};
use std::future::{Future, ready};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use typereg_queue::{ConsumeOptions, Queue};

use self::handler::JobHandler;
use crate::Context;
use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Parallel file jobs per upstream.
    pub file_concurrency: usize,
    /// How often each upstream is checked for new commits.
    pub resync_interval: Duration,
    /// Active jobs without a heartbeat for this long are re-queued.
    pub stuck_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            file_concurrency: 10,
            resync_interval: Duration::from_secs(300),
            stuck_timeout: Duration::from_secs(120),
        }
    }
}

/// Runs the whole pipeline off the queue.
///
/// Per upstream:
/// - one resync consumer, so resyncs never overlap;
/// - one ordered commit consumer, so commits are indexed oldest first;
/// - a file consumer with bounded parallelism;
/// - a scheduler that enqueues a resync whenever none is pending.
///
/// Plus one sweep re-queueing jobs whose worker died.
pub struct Worker {
    queue: Queue,
    contexts: Vec<Context>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(queue: Queue, options: WorkerOptions) -> Self {
        Self {
            queue,
            contexts: Vec::new(),
            options,
        }
    }

    pub fn with_upstream(mut self, ctx: Context) -> Self {
        self.contexts.push(ctx);
        self
    }

    /// Run until `shutdown` is cancelled, or until any task fails, in which
    /// case everything else is shut down too.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let shutdown = shutdown.child_token();
        let mut tasks: JoinSet<(&'static str, typereg_queue::error::Result<()>)> = JoinSet::new();

        for ctx in self.contexts {
            let kinds = ctx.upstream.kinds();
            info!(upstream = %ctx.upstream, url = ctx.repo_url(), "starting consumers");
            let handler = Arc::new(JobHandler::new(ctx, self.queue.clone()));
            let consumers = [
                (kinds.resync, ConsumeOptions::concurrent(1)),
                (kinds.commit, ConsumeOptions::ordered()),
                (kinds.file, ConsumeOptions::concurrent(self.options.file_concurrency)),
            ];
            for (kind, options) in consumers {
                let queue = self.queue.clone();
                let handler = Arc::clone(&handler);
                let token = shutdown.clone();
                tasks.spawn(async move { (kind, queue.consume(kind, options, handler, token).await) });
            }

            let queue = self.queue.clone();
            let token = shutdown.clone();
            let interval = self.options.resync_interval;
            tasks.spawn(async move { (kinds.resync, queue.schedule(kinds.resync, interval, seed, token).await) });
        }

        let queue = self.queue.clone();
        let token = shutdown.clone();
        let timeout = self.options.stuck_timeout;
        tasks.spawn(async move { ("stuck", queue.watch_stuck(timeout, token).await) });

        let mut failed = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {},
                Ok((task, Err(err))) => {
                    error!(task, error = ?err, "worker task failed, shutting down");
                    failed = true;
                    shutdown.cancel();
                },
                Err(err) => {
                    error!(error = %err, "worker task panicked, shutting down");
                    failed = true;
                    shutdown.cancel();
                },
            }
        }
        if failed {
            exn::bail!(ErrorKind::Worker);
        }
        info!("worker stopped");
        Ok(())
    }
}

/// Continue from the last resync's result. Without one, an empty payload
/// makes the resync start from the store's watermark.
fn seed(last: Option<Value>) -> impl Future<Output = Option<Value>> + Send {
    ready(Some(last.unwrap_or_else(|| json!({}))))
}
