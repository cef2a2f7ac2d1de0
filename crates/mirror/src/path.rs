//! Path validation for repository-relative paths.
//!
//! Paths come from commit listings and queue payloads and are handed straight
//! to git as pathspecs, so anything that could escape the repository root is
//! rejected up front.

use std::path::{Component, Path};

use crate::error::{ErrorKind, Result};

/// Validates a repository path and returns it in git's `/`-separated form.
///
/// > **Note:** Null bytes are explicitly rejected; `..` is only allowed while
/// >           it stays inside the repository.
///
/// # Examples
///
/// ```
/// use typereg_mirror::validate_path;
/// assert_eq!(validate_path("react/index.d.ts").unwrap(), "react/index.d.ts");
/// assert_eq!(validate_path("./a//b/../c.d.ts").unwrap(), "a/c.d.ts");
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// ```
pub fn validate(path: impl AsRef<str>) -> Result<String> {
    let raw = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(raw.to_string());
    let mut components = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(s) => {
                // Path::components() lets NUL through; git would truncate at it.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(invalid());
                }
                match s.to_str() {
                    Some(s) => components.push(s),
                    None => exn::bail!(invalid()),
                }
            },
            Component::CurDir => {},
            // Absolute paths would be read relative to the filesystem root.
            Component::RootDir | Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(invalid()),
        false => Ok(components.join("/")),
    }
}
