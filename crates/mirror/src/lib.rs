//! Local mirrors of upstream git repositories.
//!
//! A [`Mirror`] is the only thing in the system that talks to git. Everything
//! above it works in terms of commit ids, [`Change`](typereg_extract::models::Change)s
//! and byte prefixes of files.

pub mod backend;
pub mod error;
mod path;

use std::sync::Arc;

#[cfg(feature = "mock")]
pub use crate::backend::MockMirror;
pub use crate::backend::{CommitStream, GitMirror, Mirror, Refresh};
pub use crate::path::validate as validate_path;

/// Shared, type-erased mirror.
pub type MirrorHandle = Arc<dyn Mirror + Send + Sync>;
