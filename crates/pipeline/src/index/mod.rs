//! Turning one commit, or one file change within it, into store writes.
//!
//! These are the bodies of the commit and file jobs. They don't know about
//! the queue: the worker enqueues what [`plan_commit`] returns, `sync` runs it
//! inline.

mod definitions;
mod registry;

use serde::Serialize;
use time::UtcDateTime;
use tracing::{debug, instrument};
use typereg_extract::models::Source;
use typereg_mirror::error::ErrorKind as MirrorErrorKind;

use crate::error::{ErrorKind, Result};
use crate::job::FileJob;
use crate::{Context, Upstream};

/// What indexing a file change did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FileOutcome {
    /// The entry was upserted; `versions` counts the version rows written.
    Indexed { source: Source, name: String, versions: usize },
    /// The file is gone; `versions` counts the version rows retired.
    Deprecated { versions: u64 },
    /// Nothing to index. Malformed files end up here rather than failing.
    Skipped { reason: &'static str },
}

/// The relevant file changes of `commit`, as file jobs.
#[instrument(skip(ctx), fields(upstream = %ctx.upstream))]
pub async fn plan_commit(ctx: &Context, commit: &str) -> Result<Vec<FileJob>> {
    let classifier = ctx.classifier();
    let changes = ctx.mirror.files_changed(commit).await.map_err(ErrorKind::mirror)?;
    let total = changes.len();
    let jobs: Vec<FileJob> = changes
        .into_iter()
        .filter(|change| classifier.classify(change).is_some())
        .map(|change| FileJob { commit: commit.to_string(), change })
        .collect();
    debug!(total, relevant = jobs.len(), "classified commit changes");
    Ok(jobs)
}

/// Record `commit` as processed for this upstream.
pub async fn mark_commit(ctx: &Context, commit: &str) -> Result<()> {
    let date = commit_date(ctx, commit).await?;
    ctx.repo
        .record_commit(ctx.repo_url(), commit, date)
        .await
        .map_err(ErrorKind::store)
}

/// Apply one file change to the store.
///
/// Every write for the change happens in one transaction, and every write is
/// guarded by the commit date, so running the same job twice, or jobs of
/// different commits out of order, ends in the same state.
#[instrument(skip(ctx, job), fields(upstream = %ctx.upstream, commit = %job.commit, path = %job.change.path))]
pub async fn index_file(ctx: &Context, job: &FileJob) -> Result<FileOutcome> {
    let Some(action) = ctx.classifier().classify(&job.change) else {
        return Ok(FileOutcome::Skipped { reason: "irrelevant path" });
    };
    let at = commit_date(ctx, &job.commit).await?;
    let outcome = match ctx.upstream {
        Upstream::DefinitelyTyped => definitions::index(ctx, job, action, at).await?,
        Upstream::Registry => registry::index(ctx, job, action, at).await?,
    };
    debug!(?outcome, "indexed file change");
    Ok(outcome)
}

async fn commit_date(ctx: &Context, commit: &str) -> Result<UtcDateTime> {
    ctx.mirror.commit_date(commit).await.map_err(ErrorKind::mirror)
}

/// Leading bytes of a file at a commit, or `None` if it isn't there.
async fn read(ctx: &Context, path: &str, commit: &str, max_bytes: usize) -> Result<Option<Vec<u8>>> {
    match ctx.mirror.read_file_at(path, commit, max_bytes).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if matches!(&*err, MirrorErrorKind::NotFound { .. }) => Ok(None),
        Err(err) => Err(ErrorKind::mirror(err)),
    }
}
