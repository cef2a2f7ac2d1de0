//! Incremental indexing of upstream repositories into the store.
//!
//! Work flows through three job kinds per upstream:
//! 1. **resync** walks the mirror's history from the last continuation point
//!    and enqueues one commit job per new commit;
//! 2. **commit** (consumed in order) enqueues one file job per relevant file
//!    change, then advances the upstream's watermark;
//! 3. **file** reads the file at its commit and upserts or deprecates.
//!
//! Every store write is ordered by commit date, so file jobs may run in
//! parallel and out of order. [`Worker`] drives this off the queue, [`sync`]
//! does the same inline for one upstream.

pub mod error;

mod context;
mod index;
mod job;
mod status;
mod sync;
mod upstream;
mod worker;

pub use crate::context::Context;
pub use crate::index::{FileOutcome, index_file, mark_commit, plan_commit};
pub use crate::job::{CommitJob, FileJob, Job, ResyncJob};
pub use crate::status::{Status, status};
pub use crate::sync::{SyncEvent, sync};
pub use crate::upstream::{JobKinds, Upstream};
pub use crate::worker::{Worker, WorkerOptions};
