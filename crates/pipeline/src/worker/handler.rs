use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use serde_json::Value;
use tracing::{debug, info, instrument};
use typereg_queue::{Failure, Handler, Queue};

use crate::error::{Error, ErrorKind, Result};
use crate::index::{index_file, mark_commit, plan_commit};
use crate::job::{CommitJob, Job, ResyncJob};
use crate::Context;

/// Commit jobs are enqueued in batches of this size while walking history,
/// so a first sync of a large repository never holds all of it in memory.
const RESYNC_CHUNK: usize = 500;

/// Runs every job kind of one upstream.
pub(crate) struct JobHandler {
    ctx: Context,
    queue: Queue,
}

impl JobHandler {
    pub(crate) fn new(ctx: Context, queue: Queue) -> Self {
        Self { ctx, queue }
    }

    /// Enqueue a commit job for every commit after the continuation point.
    ///
    /// Returns the continuation point for the next resync: the newest commit
    /// that was enqueued, or the old one if there was nothing new.
    #[instrument(skip(self), fields(upstream = %self.ctx.upstream))]
    pub(crate) async fn resync(&self, job: ResyncJob) -> Result<ResyncJob> {
        let ctx = &self.ctx;
        let refresh = ctx.mirror.ensure_fresh().await.map_err(ErrorKind::mirror)?;
        debug!(?refresh, "mirror ready");
        let after = match job.commit {
            Some(commit) => Some(commit),
            None => ctx
                .repo
                .latest_commit(ctx.repo_url())
                .await
                .map_err(ErrorKind::store)?
                .map(|mark| mark.commit),
        };

        let mut last = after.clone();
        let mut queued = 0;
        let mut chunk = Vec::with_capacity(RESYNC_CHUNK);
        let mut commits = ctx.mirror.commits_since(after.as_deref());
        while let Some(commit) = commits.try_next().await.map_err(ErrorKind::mirror)? {
            chunk.push(CommitJob { commit });
            if chunk.len() == RESYNC_CHUNK {
                queued += self.flush(&mut chunk, &mut last).await?;
            }
        }
        queued += self.flush(&mut chunk, &mut last).await?;

        info!(queued, from = ?after, to = ?last, "resync complete");
        Ok(ResyncJob { commit: last })
    }

    async fn flush(&self, chunk: &mut Vec<CommitJob>, last: &mut Option<String>) -> Result<usize> {
        let Some(newest) = chunk.last().map(|job| job.commit.clone()) else {
            return Ok(0);
        };
        let queued = self
            .queue
            .enqueue_all(self.ctx.upstream.kinds().commit, chunk.drain(..))
            .await
            .map_err(ErrorKind::queue)?;
        *last = Some(newest);
        Ok(queued)
    }

    /// Queue the commit's relevant file changes, then advance the watermark.
    #[instrument(skip(self, job), fields(upstream = %self.ctx.upstream, commit = %job.commit))]
    pub(crate) async fn index_commit(&self, job: &CommitJob) -> Result<()> {
        let ctx = &self.ctx;
        ctx.mirror.ensure_fresh().await.map_err(ErrorKind::mirror)?;
        let files = plan_commit(ctx, &job.commit).await?;
        let queued = self
            .queue
            .enqueue_all(ctx.upstream.kinds().file, files)
            .await
            .map_err(ErrorKind::queue)?;
        // Only once the file jobs are durable may the watermark move past
        // this commit.
        mark_commit(ctx, &job.commit).await?;
        debug!(queued, "commit indexed");
        Ok(())
    }

    async fn dispatch(&self, job: &typereg_queue::Job) -> Result<Option<Value>> {
        match Job::from_queued(self.ctx.upstream, job)? {
            Job::Resync(job) => {
                let next = self.resync(job).await?;
                serde_json::to_value(next).map(Some).or_raise(|| ErrorKind::Payload)
            },
            Job::IndexCommit(job) => self.index_commit(&job).await.map(|()| None),
            Job::IndexFile(job) => index_file(&self.ctx, &job).await.map(|_| None),
        }
    }
}

#[async_trait]
impl Handler for JobHandler {
    async fn handle(&self, job: &typereg_queue::Job) -> std::result::Result<Option<Value>, Failure> {
        self.dispatch(job).await.map_err(failure)
    }
}

fn failure(err: Error) -> Failure {
    Failure {
        message: format!("{err:?}"),
        retryable: err.is_retryable(),
    }
}
