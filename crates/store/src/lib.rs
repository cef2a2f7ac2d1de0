//! SQLite store for package entries and their versions.
//!
//! The store is where the ingestion pipeline's output ends up and what the
//! read side queries. Writes are last-writer-wins by event time (the date of
//! the commit that caused them), never by arrival order, so replaying or
//! reordering events converges on the same state.
//!
//! # Architecture
//! - **Entries**: one per (name, source), never deleted.
//! - **Versions**: one per (entry, tag); retired by setting `deprecated`.
//! - **Deprecations**: every deprecation event, so that late writes catch up.
//! - **Commits**: processed commits per upstream, the newest being the
//!   watermark a resync continues from.

mod db;
pub mod error;
pub mod models;
mod repo;
mod search;
mod tag;
mod upsert;

pub use crate::db::Database;
pub use crate::repo::{Deprecation, Repository, Transaction};
pub use crate::search::{Order, SearchOptions, Sort};
pub use crate::tag::tag;
pub use crate::upsert::{Upsert, Write};
