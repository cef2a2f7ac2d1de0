//! Version tags.
//!
//! A tag is the nominal version with the event time (and compiler, if any)
//! appended as build metadata, e.g. `1.2.0+20160301120000.typescript-1-8`.
//! Build metadata doesn't take part in semver precedence, so tags sort like
//! their versions, but every upload of a version gets its own tag.

use semver::{BuildMetadata, Version};
use time::UtcDateTime;
use time::macros::format_description;

/// Compute the tag for a version published at `at`.
///
/// Returns `None` when the result isn't valid semver (the version itself
/// isn't, typically a `*`); such versions can't be tagged and are skipped.
///
/// ```
/// use time::macros::utc_datetime;
/// use typereg_store::tag;
///
/// let at = utc_datetime!(2016-03-01 12:00:00);
/// assert_eq!(tag("1.2.0", at, None).as_deref(), Some("1.2.0+20160301120000"));
/// assert_eq!(tag("1.2.0", at, Some(">=1.8")).as_deref(), Some("1.2.0+20160301120000.1-8"));
/// assert_eq!(tag("*", at, None), None);
/// ```
pub fn tag(version: &str, at: UtcDateTime, compiler: Option<&str>) -> Option<String> {
    let mut parsed = Version::parse(version).ok()?;
    let timestamp = at.format(format_description!("[year][month][day][hour][minute][second]")).ok()?;
    let compiler = compiler.map(sanitize_compiler).unwrap_or_default();
    let mut identifiers: Vec<&str> = Vec::new();
    if !parsed.build.is_empty() {
        identifiers.push(parsed.build.as_str());
    }
    identifiers.push(&timestamp);
    if !compiler.is_empty() {
        identifiers.push(&compiler);
    }
    parsed.build = BuildMetadata::new(&identifiers.join(".")).ok()?;
    Some(parsed.to_string())
}

/// Squash a compiler constraint into one build identifier: runs of anything
/// outside `[0-9A-Za-z-]` become a single `-`.
fn sanitize_compiler(compiler: &str) -> String {
    let mut sanitized = String::with_capacity(compiler.len());
    for c in compiler.chars() {
        match c.is_ascii_alphanumeric() || c == '-' {
            true => sanitized.push(c),
            false if !sanitized.ends_with('-') => sanitized.push('-'),
            false => {},
        }
    }
    sanitized.trim_matches('-').to_string()
}
