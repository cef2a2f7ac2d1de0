//! Job payloads.
//!
//! Each queue kind carries exactly one payload type, so a payload is always
//! read back as the type it was written as. On the wire they are the small
//! JSON objects the queue stores: `{"commit": ".."}` and
//! `{"commit": "..", "change": ["M", "path"]}`.

use exn::{ResultExt, bail};
use serde::{Deserialize, Serialize};
use typereg_extract::models::Change;

use crate::Upstream;
use crate::error::{ErrorKind, Result};

/// Walk an upstream's history from after `commit`.
///
/// Without a commit, the walk continues from the store's watermark, or from
/// the very first commit if nothing has been processed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Queue the relevant file changes of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitJob {
    pub commit: String,
}

/// Index a single file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileJob {
    pub commit: String,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Resync(ResyncJob),
    IndexCommit(CommitJob),
    IndexFile(FileJob),
}

impl Job {
    /// Queue kind this job is stored under for `upstream`.
    pub fn kind(&self, upstream: Upstream) -> &'static str {
        let kinds = upstream.kinds();
        match self {
            Self::Resync(_) => kinds.resync,
            Self::IndexCommit(_) => kinds.commit,
            Self::IndexFile(_) => kinds.file,
        }
    }

    /// Read a claimed queue job back into its typed form.
    pub fn from_queued(upstream: Upstream, job: &typereg_queue::Job) -> Result<Self> {
        let kinds = upstream.kinds();
        let kind = job.kind.as_str();
        let parsed = if kind == kinds.resync {
            job.payload().map(Self::Resync)
        } else if kind == kinds.commit {
            job.payload().map(Self::IndexCommit)
        } else if kind == kinds.file {
            job.payload().map(Self::IndexFile)
        } else {
            bail!(ErrorKind::Payload);
        };
        parsed.or_raise(|| ErrorKind::Payload)
    }
}
