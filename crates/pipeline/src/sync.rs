//! Indexing an upstream inline, without the queue.

use async_stream::stream;
use futures::{Stream, StreamExt, TryStreamExt, stream};
use serde::Serialize;
use tracing::info;

use crate::error::{ErrorKind, Result};
use crate::index::{FileOutcome, index_file, mark_commit, plan_commit};
use crate::{Context, Upstream};

/// Progress of a [`sync`].
///
/// Events arrive in order: [`Started`](Self::Started) once, then for each
/// commit its [`FileIndexed`](Self::FileIndexed) events followed by one
/// [`CommitIndexed`](Self::CommitIndexed), then [`Complete`](Self::Complete).
/// An error ends the stream early and `Complete` is never emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SyncEvent {
    /// Continuing after `after`, or from the first commit.
    Started { upstream: Upstream, after: Option<String> },
    FileIndexed { commit: String, path: String, outcome: FileOutcome },
    /// Every file of `commit` is indexed and the watermark has moved past it.
    CommitIndexed { commit: String, files: usize },
    Complete { upstream: Upstream, commits: usize },
}

/// Index every commit after the store's watermark, oldest first, running up
/// to `concurrency` file changes of a commit at once.
///
/// A file that fails to index stops the sync before its commit is marked, so
/// the next sync retries that commit from the start.
pub fn sync(ctx: &Context, concurrency: usize) -> impl Stream<Item = Result<SyncEvent>> + '_ {
    stream!({
        if let Err(err) = ctx.mirror.ensure_fresh().await {
            yield Err(ErrorKind::mirror(err));
            return;
        }
        let after = match ctx.repo.latest_commit(ctx.repo_url()).await {
            Ok(mark) => mark.map(|mark| mark.commit),
            Err(err) => {
                yield Err(ErrorKind::store(err));
                return;
            },
        };
        yield Ok(SyncEvent::Started { upstream: ctx.upstream, after: after.clone() });

        let mut commits = ctx.mirror.commits_since(after.as_deref());
        let mut indexed = 0;
        loop {
            let commit = match commits.try_next().await {
                Ok(Some(commit)) => commit,
                Ok(None) => break,
                Err(err) => {
                    yield Err(ErrorKind::mirror(err));
                    return;
                },
            };
            let jobs = match plan_commit(ctx, &commit).await {
                Ok(jobs) => jobs,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            let files = jobs.len();
            let mut outcomes = stream::iter(&jobs)
                .map(|job| async move { index_file(ctx, job).await.map(|outcome| (job, outcome)) })
                .buffer_unordered(concurrency.max(1));
            while let Some(result) = outcomes.next().await {
                match result {
                    Ok((job, outcome)) => {
                        yield Ok(SyncEvent::FileIndexed {
                            commit: commit.clone(),
                            path: job.change.path.clone(),
                            outcome,
                        });
                    },
                    Err(err) => {
                        yield Err(err);
                        return;
                    },
                }
            }
            if let Err(err) = mark_commit(ctx, &commit).await {
                yield Err(err);
                return;
            }
            indexed += 1;
            yield Ok(SyncEvent::CommitIndexed { commit, files });
        }

        info!(upstream = %ctx.upstream, commits = indexed, "sync complete");
        yield Ok(SyncEvent::Complete { upstream: ctx.upstream, commits: indexed });
    })
}
