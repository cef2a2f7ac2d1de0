//! Mirror backed by a local clone, driven through the `git` executable.

use crate::backend::{CommitStream, Mirror, Refresh};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use time::UtcDateTime;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;
use typereg_extract::models::{Change, Disposition};

/// Fragments of git's stderr that mean the local copy can't be trusted.
const CORRUPTION_MARKERS: &[&str] = &[
    "not a git repository",
    "corrupt",
    "bad index file",
    "index file smaller than expected",
    "unable to read",
    "object file",
    "does not have any commits",
];
/// Fragments of git's stderr that mean a revision isn't in the object store.
const UNKNOWN_REVISION_MARKERS: &[&str] = &[
    "bad object",
    "bad revision",
    "unknown revision",
    "invalid object name",
    "not a tree object",
    "not a valid object name",
];

/// Local clone of a remote repository.
///
/// The clone lives at `root`. Refreshes are rate-limited by `min_interval`
/// and serialized through an async lock, which also holds the time of the
/// last successful refresh.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use typereg_mirror::{GitMirror, Mirror};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mirror = GitMirror::new(
///     "https://github.com/typings/registry.git",
///     "master",
///     "/var/lib/typereg/registry",
///     Duration::from_secs(300),
/// )?;
/// mirror.ensure_fresh().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GitMirror {
    git: PathBuf,
    url: String,
    branch: String,
    root: PathBuf,
    min_interval: Duration,
    refreshed: Mutex<Option<Instant>>,
}
impl GitMirror {
    /// Create a mirror of `url`'s `branch` at `root`.
    ///
    /// Nothing touches the network or the filesystem until the first
    /// operation; `root` is cloned on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not absolute, or there's no `git` on the
    /// `PATH`.
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        root: impl AsRef<Path>,
        min_interval: Duration,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || root.parent().is_none() {
            exn::bail!(ErrorKind::InvalidPath(root.display().to_string()));
        }
        let git = which::which("git").or_raise(|| ErrorKind::GitNotFound)?;
        tracing::trace!(git = %git.display(), root = %root.display(), "discovered git executable");
        Ok(Self {
            git,
            url: url.into(),
            branch: branch.into(),
            root,
            min_interval,
            refreshed: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command<I, S>(&self, cwd: &Path, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.git);
        command
            .args(args)
            .current_dir(cwd)
            // Never wait for credentials on a terminal nobody is looking at.
            .env("GIT_TERMINAL_PROMPT", "0")
            // Never fall back to a repository in a parent directory.
            .env("GIT_CEILING_DIRECTORIES", self.root.parent().unwrap_or(&self.root))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn failure(&self, args: &[&str], stderr: &[u8]) -> ErrorKind {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        let lowered = stderr.to_lowercase();
        match args.first().copied() {
            Some("clone" | "fetch") => ErrorKind::Network(stderr),
            _ if CORRUPTION_MARKERS.iter().any(|m| lowered.contains(m)) => ErrorKind::Corrupt(stderr),
            _ if UNKNOWN_REVISION_MARKERS.iter().any(|m| lowered.contains(m)) => ErrorKind::UnknownRevision(stderr),
            _ => ErrorKind::Git(format!("git {}: {stderr}", args.join(" "))),
        }
    }

    /// Run git inside the checkout and return its stdout.
    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        tracing::trace!(args = ?args, "running git");
        let output = self.command(&self.root, args).output().await.or_raise(|| ErrorKind::Io)?;
        if !output.status.success() {
            exn::bail!(self.failure(args, &output.stderr));
        }
        Ok(output.stdout)
    }

    async fn has_checkout(&self) -> bool {
        tokio::fs::try_exists(self.root.join(".git")).await.unwrap_or(false)
    }

    /// Remove whatever is at `root` and clone from scratch.
    ///
    /// Must be called with the refresh lock held.
    #[instrument(skip(self), fields(url = %self.url, root = %self.root.display()))]
    async fn clone_fresh(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.root).await.unwrap_or(false) {
            tracing::warn!("removing unusable local copy before cloning");
            tokio::fs::remove_dir_all(&self.root).await.or_raise(|| ErrorKind::Io)?;
        }
        let parent = self.root.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
        let root = self.root.to_string_lossy();
        let args = ["clone", "--branch", self.branch.as_str(), "--", self.url.as_str(), &*root];
        let output = self.command(parent, args).output().await.or_raise(|| ErrorKind::Io)?;
        if !output.status.success() {
            exn::bail!(self.failure(&args, &output.stderr));
        }
        tracing::info!("cloned repository");
        Ok(())
    }

    async fn update(&self) -> Result<()> {
        let remote = format!("origin/{}", self.branch);
        self.run(&["checkout", "--force", &self.branch]).await?;
        self.run(&["fetch", "origin", &self.branch]).await?;
        self.run(&["reset", "--hard", &remote]).await?;
        Ok(())
    }

    /// Clone again, holding the refresh lock so nobody fetches meanwhile.
    async fn reclone(&self) -> Result<()> {
        let mut refreshed = self.refreshed.lock().await;
        self.clone_fresh().await?;
        *refreshed = Some(Instant::now());
        Ok(())
    }

    /// Run `op` against the checkout, recloning and retrying once if the
    /// checkout is missing or corrupt.
    async fn recovering<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.has_checkout().await {
            self.reclone().await?;
        }
        match op().await {
            Err(e) if matches!(&*e, ErrorKind::Corrupt(_)) => {
                tracing::warn!(url = %self.url, error = %*e, "local copy is corrupt, cloning again");
                self.reclone().await?;
                op().await
            },
            result => result,
        }
    }

    /// Stream `git cat-file blob` and stop after `max_bytes`.
    async fn read_blob(&self, object: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let mut child = self
            .command(&self.root, ["cat-file", "blob", object])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .or_raise(|| ErrorKind::Io)?;
        let stdout = child.stdout.take().ok_or_raise(|| ErrorKind::Io)?;
        let mut buffer = Vec::with_capacity(max_bytes.min(64 * 1024));
        stdout
            .take(max_bytes as u64)
            .read_to_end(&mut buffer)
            .await
            .or_raise(|| ErrorKind::Io)?;
        if buffer.len() >= max_bytes {
            // Don't care about the rest, and don't wait for git to write it.
            _ = child.kill().await;
            return Ok(buffer);
        }
        let output = child.wait_with_output().await.or_raise(|| ErrorKind::Io)?;
        if !output.status.success() {
            exn::bail!(self.failure(&["cat-file", "blob", object], &output.stderr));
        }
        Ok(buffer)
    }
}

#[async_trait]
impl Mirror for GitMirror {
    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn ensure_fresh(&self) -> Result<Refresh> {
        let mut refreshed = self.refreshed.lock().await;
        if !self.has_checkout().await {
            self.clone_fresh().await?;
            *refreshed = Some(Instant::now());
            return Ok(Refresh::Cloned);
        }
        if let Some(at) = *refreshed
            && at.elapsed() < self.min_interval
        {
            return Ok(Refresh::Fresh);
        }
        let refresh = match self.update().await {
            Ok(()) => Refresh::Fetched,
            Err(e) if matches!(&*e, ErrorKind::Corrupt(_)) => {
                tracing::warn!(error = %*e, "local copy is corrupt, cloning again");
                self.clone_fresh().await?;
                Refresh::Cloned
            },
            Err(e) => return Err(e),
        };
        *refreshed = Some(Instant::now());
        tracing::debug!(?refresh, "refreshed local copy");
        Ok(refresh)
    }

    fn commits_since<'a>(&'a self, after: Option<&'a str>) -> CommitStream<'a> {
        let range = match after {
            Some(commit) => format!("{commit}..HEAD"),
            None => "HEAD".to_string(),
        };
        Box::pin(stream! {
            if !self.has_checkout().await && let Err(e) = self.reclone().await {
                yield Err(e);
                return;
            }
            // Parents before children even when committer dates are skewed.
            let args = ["rev-list", "--topo-order", "--reverse", range.as_str()];
            let mut child = match self.command(&self.root, args).stdout(Stdio::piped()).stderr(Stdio::piped()).spawn() {
                Ok(child) => child,
                Err(e) => {
                    yield Err::<String, _>(e).or_raise(|| ErrorKind::Io);
                    return;
                },
            };
            let Some(stdout) = child.stdout.take() else {
                yield Err(exn::Exn::from(ErrorKind::Io));
                return;
            };
            // Commits are forwarded as git prints them; never buffered in full.
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.is_empty() => continue,
                    Ok(Some(line)) => yield Ok(line),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err::<String, _>(e).or_raise(|| ErrorKind::Io);
                        return;
                    },
                }
            }
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => {},
                Ok(output) => yield Err(exn::Exn::from(self.failure(&args, &output.stderr))),
                Err(e) => yield Err::<String, _>(e).or_raise(|| ErrorKind::Io),
            }
        })
    }

    #[instrument(skip(self))]
    async fn files_changed(&self, commit: &str) -> Result<Vec<Change>> {
        let args = [
            "diff-tree",
            "--no-commit-id",
            "--name-status",
            "--no-renames",
            "--diff-filter=ADM",
            "-r",
            "-z",
            "--root",
            commit,
        ];
        let stdout = self.recovering(|| self.run(&args)).await?;
        let stdout = String::from_utf8(stdout).or_raise(|| ErrorKind::InvalidOutput("non UTF-8 path".to_string()))?;
        let fields = stdout.split('\0').filter(|field| !field.is_empty()).collect::<Vec<_>>();
        fields
            .chunks(2)
            .map(|pair| match pair {
                [status, path] => Disposition::from_status(status)
                    .map(|disposition| Change::new(disposition, *path))
                    .ok_or_raise(|| ErrorKind::InvalidOutput(format!("unknown status {status}"))),
                _ => exn::bail!(ErrorKind::InvalidOutput(format!("dangling field {pair:?}"))),
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn read_file_at(&self, path: &str, commit: &str, max_bytes: usize) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let not_found = || ErrorKind::NotFound { path: path.clone(), commit: commit.to_string() };
        let args = ["ls-tree", "-z", commit, "--", path.as_str()];
        let listing = self.recovering(|| self.run(&args)).await?;
        let listing = String::from_utf8_lossy(&listing);
        // `<mode> SP <type> SP <object> TAB <path>`
        let entry = listing.split('\0').next().unwrap_or_default();
        let mut fields = entry.split_whitespace();
        let object = match (fields.next(), fields.next(), fields.next()) {
            (Some(_), Some("blob"), Some(object)) => object.to_string(),
            _ => exn::bail!(not_found()),
        };
        self.recovering(|| self.read_blob(&object, max_bytes)).await
    }

    #[instrument(skip(self))]
    async fn commit_date(&self, commit: &str) -> Result<UtcDateTime> {
        let args = ["show", "-s", "--format=%ct", commit];
        let stdout = self.recovering(|| self.run(&args)).await?;
        let stdout = String::from_utf8_lossy(&stdout);
        let seconds = stdout
            .trim()
            .parse::<i64>()
            .or_raise(|| ErrorKind::InvalidOutput(stdout.to_string()))?;
        UtcDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidOutput(stdout.to_string()))
    }
}
