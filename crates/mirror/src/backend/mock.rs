//! In-memory mirror for testing.

use super::{CommitStream, Mirror, Refresh};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::UtcDateTime;
use tokio::sync::RwLock;
use typereg_extract::models::{Change, Disposition};

type Snapshot = Arc<BTreeMap<String, Vec<u8>>>;

#[derive(Debug, Clone)]
struct MockCommit {
    id: String,
    date: UtcDateTime,
    changes: Vec<Change>,
    files: Snapshot,
}

/// In-memory mirror for testing.
///
/// History is a single linear branch held behind a [`RwLock`]; every commit
/// keeps a full snapshot of the tree so files can be read at any point in
/// history. Tests append commits while a consumer is running to simulate an
/// upstream that moves on.
///
/// # Examples
///
/// ```
/// use futures::TryStreamExt;
/// use typereg_mirror::{Mirror, MockMirror};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mirror = MockMirror::new("https://example.com/registry.git");
/// mirror.commit("c1", 1_700_000_000, [("npm/left-pad.json", Some("{}"))]).await;
/// mirror.commit("c2", 1_700_000_060, [("npm/left-pad.json", None)]).await;
///
/// let commits: Vec<String> = mirror.commits_since(Some("c1")).try_collect().await?;
/// assert_eq!(commits, ["c2"]);
/// assert!(!mirror.exists_at("npm/left-pad.json", "c2").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MockMirror {
    url: String,
    history: RwLock<Vec<MockCommit>>,
    refreshes: AtomicUsize,
    failing_reads: AtomicUsize,
}

impl MockMirror {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            history: RwLock::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            failing_reads: AtomicUsize::new(0),
        }
    }

    /// Append a commit on top of the current head.
    ///
    /// `None` contents delete the file. Whether a path counts as added or
    /// modified is worked out from the previous snapshot.
    ///
    /// Panics on an invalid path, a duplicate commit id, or a deletion of a
    /// file that doesn't exist.
    pub async fn commit<'a>(
        &self,
        id: impl Into<String>,
        timestamp: i64,
        files: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) {
        let id = id.into();
        let mut history = self.history.write().await;
        // Test-only type: a broken history is a bug in the test.
        assert!(history.iter().all(|c| c.id != id), "MockMirror::commit: duplicate commit {id}");
        let mut snapshot = history.last().map(|c| (*c.files).clone()).unwrap_or_default();
        let mut changes = Vec::new();
        for (path, contents) in files {
            let Ok(path) = validate_path(path) else {
                panic!("MockMirror::commit: invalid path {path}");
            };
            let disposition = match contents {
                Some(contents) => match snapshot.insert(path.clone(), contents.as_bytes().to_vec()) {
                    Some(_) => Disposition::Modified,
                    None => Disposition::Added,
                },
                None => match snapshot.remove(&path) {
                    Some(_) => Disposition::Deleted,
                    None => panic!("MockMirror::commit: deleting missing file {path}"),
                },
            };
            changes.push(Change::new(disposition, path));
        }
        let Ok(date) = UtcDateTime::from_unix_timestamp(timestamp) else {
            panic!("MockMirror::commit: invalid timestamp {timestamp}");
        };
        history.push(MockCommit { id, date, changes, files: Arc::new(snapshot) });
    }

    /// Number of times [`Mirror::ensure_fresh`] was called.
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Make the next `count` file reads fail with a retryable error.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    async fn find(&self, commit: &str) -> Result<MockCommit> {
        self.history
            .read()
            .await
            .iter()
            .find(|c| c.id == commit)
            .cloned()
            .ok_or_else(|| exn::Exn::from(ErrorKind::UnknownRevision(commit.to_string())))
    }
}

#[async_trait]
impl Mirror for MockMirror {
    fn url(&self) -> &str {
        &self.url
    }

    async fn ensure_fresh(&self) -> Result<Refresh> {
        Ok(match self.refreshes.fetch_add(1, Ordering::SeqCst) {
            0 => Refresh::Cloned,
            _ => Refresh::Fetched,
        })
    }

    fn commits_since<'a>(&'a self, after: Option<&'a str>) -> CommitStream<'a> {
        Box::pin(stream! {
            // Snapshot ids under the read lock, then drop it before yielding.
            let ids: Vec<String> = self.history.read().await.iter().map(|c| c.id.clone()).collect();
            let start = match after {
                None => 0,
                Some(after) => match ids.iter().position(|id| id == after) {
                    Some(index) => index + 1,
                    None => {
                        yield Err(exn::Exn::from(ErrorKind::UnknownRevision(after.to_string())));
                        return;
                    },
                },
            };
            for id in ids.into_iter().skip(start) {
                yield Ok(id);
            }
        })
    }

    async fn files_changed(&self, commit: &str) -> Result<Vec<Change>> {
        Ok(self.find(commit).await?.changes)
    }

    async fn read_file_at(&self, path: &str, commit: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let failing = self.failing_reads.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            exn::bail!(ErrorKind::Io);
        }
        let found = self.find(commit).await?;
        let data = found
            .files
            .get(&path)
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound { path: path.clone(), commit: commit.to_string() }))?;
        Ok(data[..max_bytes.min(data.len())].to_vec())
    }

    async fn commit_date(&self, commit: &str) -> Result<UtcDateTime> {
        Ok(self.find(commit).await?.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn history() -> MockMirror {
        let mirror = MockMirror::new("mock://dt");
        mirror.commit("c1", 100, [("a/index.d.ts", Some("// Type definitions for a 1.0")), ("README.md", Some("hi"))]).await;
        mirror.commit("c2", 200, [("a/index.d.ts", Some("// Type definitions for a 2.0")), ("README.md", None)]).await;
        mirror.commit("c3", 300, [("b/index.d.ts", Some("b"))]).await;
        mirror
    }

    #[tokio::test]
    async fn test_commits_since() {
        let mirror = history().await;
        let all: Vec<String> = mirror.commits_since(None).try_collect().await.unwrap();
        assert_eq!(all, ["c1", "c2", "c3"]);
        let after: Vec<String> = mirror.commits_since(Some("c2")).try_collect().await.unwrap();
        assert_eq!(after, ["c3"]);
        let none: Vec<String> = mirror.commits_since(Some("c3")).try_collect().await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_commits_since_unknown() {
        let mirror = history().await;
        let result: Result<Vec<String>> = mirror.commits_since(Some("nope")).try_collect().await;
        let err = result.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownRevision(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_files_changed() {
        let mirror = history().await;
        assert_eq!(
            mirror.files_changed("c2").await.unwrap(),
            vec![Change::new(Disposition::Modified, "a/index.d.ts"), Change::new(Disposition::Deleted, "README.md")]
        );
    }

    #[tokio::test]
    async fn test_read_file_at_history() {
        let mirror = history().await;
        assert_eq!(mirror.read_file_at("a/index.d.ts", "c1", 1024).await.unwrap(), b"// Type definitions for a 1.0");
        assert_eq!(mirror.read_file_at("a/index.d.ts", "c3", 7).await.unwrap(), b"// Type");
        let err = mirror.read_file_at("README.md", "c2", 10).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound { .. }));
        assert!(mirror.exists_at("README.md", "c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_reads() {
        let mirror = history().await;
        mirror.fail_next_reads(1);
        let err = mirror.read_file_at("a/index.d.ts", "c1", 10).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(mirror.read_file_at("a/index.d.ts", "c1", 10).await.is_ok());
    }

    #[tokio::test]
    async fn test_refreshes() {
        let mirror = MockMirror::new("mock://registry");
        assert_eq!(mirror.ensure_fresh().await.unwrap(), Refresh::Cloned);
        assert_eq!(mirror.ensure_fresh().await.unwrap(), Refresh::Fetched);
        assert_eq!(mirror.refreshes(), 2);
    }
}
