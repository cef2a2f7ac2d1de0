//! Turning upstream file changes into package metadata.
//!
//! Nothing in this crate touches git or the database: given the same path and
//! bytes, every function returns the same answer, which is what makes
//! replaying a commit safe.
//!
//! - [`Classifier`] drops changes that can't describe a package.
//! - [`definition`] extracts name/version/homepage from DefinitelyTyped files.
//! - [`registry_path`] and [`registry_entry`] do the same for the JSON registry.

mod classify;
pub mod consts;
pub mod error;
pub mod models;
mod normalize;
mod registry;

pub use crate::classify::Classifier;
pub use crate::normalize::{Layout, definition, legacy_name, location, location_prefix, normalize_version};
pub use crate::registry::{registry_entry, registry_path};
