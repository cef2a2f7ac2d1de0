//! Mirror trait and implementations.
//!
//! This module defines the [`Mirror`] trait: a local, read-only view of one
//! upstream repository that can be refreshed at a bounded rate, walked commit
//! by commit, and read at any commit.

mod git;
#[cfg(feature = "mock")]
mod mock;

pub use self::git::GitMirror;
#[cfg(feature = "mock")]
pub use self::mock::MockMirror;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use time::UtcDateTime;
use typereg_extract::models::Change;

/// Lazy, forward-only sequence of commit ids.
pub type CommitStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// What [`Mirror::ensure_fresh`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// There was no usable local copy, so one was cloned.
    Cloned,
    /// The local copy was fetched and reset to the remote branch.
    Fetched,
    /// The last refresh is recent enough; nothing was done.
    Fresh,
}

/// Local copy of an upstream repository.
///
/// Each instance owns its own refresh bookkeeping, so two mirrors of the same
/// remote (for example in tests) never share rate-limit state.
///
/// # Examples
///
/// ```no_run
/// use futures::TryStreamExt;
/// # use typereg_mirror::{Mirror, error::Result};
/// # async fn example(mirror: &dyn Mirror) -> Result<()> {
/// mirror.ensure_fresh().await?;
/// let mut commits = mirror.commits_since(None);
/// while let Some(commit) = commits.try_next().await? {
///     for change in mirror.files_changed(&commit).await? {
///         println!("{commit} {} {}", change.disposition, change.path);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Remote URL. Also the key for the processed-commit watermark.
    fn url(&self) -> &str;

    /// Make sure a local copy exists and is no older than the configured
    /// minimum interval.
    ///
    /// Concurrent callers serialize: whoever comes second waits for the
    /// in-flight refresh and then sees a fresh copy.
    async fn ensure_fresh(&self) -> Result<Refresh>;

    /// Commits reachable from the branch head, oldest first, excluding `after`
    /// and all of its ancestors.
    fn commits_since<'a>(&'a self, after: Option<&'a str>) -> CommitStream<'a>;

    /// Added, modified and deleted files in one commit. Renames are reported
    /// as a deletion plus an addition.
    async fn files_changed(&self, commit: &str) -> Result<Vec<Change>>;

    /// Leading `max_bytes` of a file as of `commit`.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the path doesn't exist at
    /// that commit.
    async fn read_file_at(&self, path: &str, commit: &str, max_bytes: usize) -> Result<Vec<u8>>;

    /// Committer timestamp; the event time of everything derived from the commit.
    async fn commit_date(&self, commit: &str) -> Result<UtcDateTime>;

    /// Whether a file exists at `commit`.
    ///
    /// Default implementation reads a single byte via
    /// [`read_file_at()`](Self::read_file_at).
    async fn exists_at(&self, path: &str, commit: &str) -> Result<bool> {
        match self.read_file_at(path, commit, 1).await {
            Ok(_) => Ok(true),
            Err(e) if matches!(&*e, ErrorKind::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
