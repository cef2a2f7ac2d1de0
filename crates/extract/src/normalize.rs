//! Name and version normalization for DefinitelyTyped definition files.
//!
//! Everything in here is a pure function of its inputs, so replaying the same
//! file at the same commit always yields the same [`Definition`].

use std::borrow::Cow;
use tracing::instrument;

use crate::consts::{
    DEFAULT_VERSION, DEFINITION_EXTENSION, ENTRYPOINT, FILE_VERSION_REGEX, HEADER_PROJECT_REGEX, HEADER_VERSION_REGEX,
    LOCATION_PREFIX, MISSING_PATCH_REGEX, Rewrite, SANITIZE_REGEX, VERSION_REWRITES,
};
use crate::models::Definition;

/// Directory layout of a definition file at a given commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Flat files, possibly nested one directory deep (`jquery/jquery.d.ts`).
    Legacy,
    /// One directory per package, marked by a project config next to the
    /// definition (`react/index.d.ts` + `react/tsconfig.json`).
    Modern,
}

/// Normalize a loose version string into valid semver.
///
/// Returns `None` if the result still isn't valid semver.
///
/// ```
/// use typereg_extract::normalize_version;
/// assert_eq!(normalize_version("1.2.x").as_deref(), Some("1.2.0"));
/// assert_eq!(normalize_version("4.x").as_deref(), Some("4.0.0"));
/// assert_eq!(normalize_version("1.4+").as_deref(), Some("1.4.0"));
/// assert_eq!(normalize_version("2.1").as_deref(), Some("2.1.0"));
/// assert_eq!(normalize_version("1.2.3-beta").as_deref(), Some("1.2.3-beta"));
/// assert_eq!(normalize_version("banana"), None);
/// ```
pub fn normalize_version(raw: &str) -> Option<String> {
    let mut version = raw.trim().to_string();
    for rewrite in VERSION_REWRITES {
        version = match rewrite {
            Rewrite::WildcardSegment => version
                .split('.')
                .enumerate()
                .map(|(i, segment)| match segment {
                    "x" if i > 0 => "0",
                    _ => segment,
                })
                .collect::<Vec<_>>()
                .join("."),
            Rewrite::TrailingPlus => match version.strip_suffix('+') {
                Some(stripped) => format!("{stripped}.0"),
                None => version,
            },
            Rewrite::MissingPatch if MISSING_PATCH_REGEX.is_match(&version) => format!("{version}.0"),
            Rewrite::MissingPatch => version,
        };
    }
    semver::Version::parse(&version).ok().map(|v| v.to_string())
}

/// Strip characters that vary between a directory and its file names.
fn sanitize(name: &str) -> Cow<'_, str> {
    SANITIZE_REGEX.replace_all(name, "")
}

/// Collapse the legacy `dir/file` layout to a single canonical name.
///
/// ```
/// use typereg_extract::legacy_name;
/// assert_eq!(legacy_name("jquery"), "jquery");
/// assert_eq!(legacy_name("google.maps/google-maps"), "google-maps");
/// assert_eq!(legacy_name("react/react-dom"), "react-dom");
/// assert_eq!(legacy_name("angularjs/angular"), "angular");
/// assert_eq!(legacy_name("node/events"), "node/events");
/// ```
pub fn legacy_name(name: &str) -> String {
    match name.split('/').collect::<Vec<_>>().as_slice() {
        [dir, file] => {
            let sanitized_dir = sanitize(dir);
            if sanitized_dir == sanitize(file) || file.starts_with(sanitized_dir.as_ref()) {
                file.to_string()
            } else {
                name.to_string()
            }
        },
        _ => name.to_string(),
    }
}

/// Extract the package name, version and homepage from a definition file.
///
/// `header` is the leading chunk of the file; the header comment is
/// authoritative over anything derived from the path. Returns `None` for
/// files that are part of a package but don't define it (helpers next to a
/// modern `index.d.ts`).
#[instrument(level = "trace", skip(header))]
pub fn definition(path: &str, header: &str, layout: Layout) -> Option<Definition> {
    let lowered = path.to_lowercase();
    let fullpath = lowered.strip_suffix(DEFINITION_EXTENSION).unwrap_or(&lowered);
    let fullname = FILE_VERSION_REGEX.replace(fullpath, "");
    let mut version = match fullpath.len() > fullname.len() {
        // Skip the separating hyphen.
        true => normalize_version(&fullpath[fullname.len() + 1..]),
        false => None,
    }
    .unwrap_or_else(|| DEFAULT_VERSION.to_string());

    let name = match (layout, parent(fullpath)) {
        (Layout::Modern, Some(package)) => {
            let (dir, base) = split_last(&fullname);
            if dir != Some(base) && base != ENTRYPOINT && version == DEFAULT_VERSION {
                tracing::debug!(path, "skipping secondary file in package directory");
                return None;
            }
            package.to_string()
        },
        _ => legacy_name(&fullname),
    };

    if let Some(declared) = HEADER_VERSION_REGEX.captures(header).and_then(|c| normalize_version(&c[1])) {
        version = declared;
    }
    let homepage = HEADER_PROJECT_REGEX.captures(header).map(|c| c[1].to_string());
    Some(Definition { name, version, homepage })
}

fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir).filter(|dir| !dir.is_empty())
}

fn split_last(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some((dir, base)) => (Some(dir), base),
        None => (None, path),
    }
}

/// Pointer to a DefinitelyTyped file at a specific commit.
///
/// ```
/// use typereg_extract::location;
/// assert_eq!(
///     location("react/react.d.ts", "abc123"),
///     "github:DefinitelyTyped/DefinitelyTyped/react/react.d.ts#abc123"
/// );
/// ```
pub fn location(path: &str, commit: &str) -> String {
    format!("{LOCATION_PREFIX}{path}#{commit}")
}

/// Prefix shared by the locations of a file across every commit.
pub fn location_prefix(path: &str) -> String {
    format!("{LOCATION_PREFIX}{path}#")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.x", Some("1.2.0"))]
    #[case("1.x", Some("1.0.0"))]
    #[case("1.x.x", Some("1.0.0"))]
    #[case("0.10+", Some("0.10.0"))]
    #[case("3.0", Some("3.0.0"))]
    #[case("15.0.1", Some("15.0.1"))]
    #[case("2.0.0-rc.1", Some("2.0.0-rc.1"))]
    #[case("x.1", None)]
    #[case("1", None)]
    #[case("1.2.3.4", None)]
    fn test_normalize_version(#[case] raw: &str, #[case] expected: Option<&str>) {
        assert_eq!(normalize_version(raw).as_deref(), expected);
    }

    #[rstest]
    #[case("foo/foo-1.2.x.d.ts", "", "foo", "1.2.0", None)]
    #[case("jquery/jquery.d.ts", "", "jquery", "0.0.0", None)]
    #[case("Node/Node-0.10.d.ts", "", "node", "0.10.0", None)]
    #[case("react/react-dom-15.0.0.d.ts", "// Type definitions for react-dom v15.0.1\n", "react-dom", "15.0.1", None)]
    #[case(
        "lodash/lodash.d.ts",
        "// Type definitions for Lo-Dash 4.x\n// Project: http://lodash.com/\n",
        "lodash",
        "4.0.0",
        Some("http://lodash.com/")
    )]
    #[case("node/events.d.ts", "", "node/events", "0.0.0", None)]
    #[case("express/express-serve-static-core.d.ts", "", "express-serve-static-core", "0.0.0", None)]
    #[case("three/detector.d.ts", "", "three/detector", "0.0.0", None)]
    #[case("a/b/c.d.ts", "", "a/b/c", "0.0.0", None)]
    fn test_legacy_definition(
        #[case] path: &str,
        #[case] header: &str,
        #[case] name: &str,
        #[case] version: &str,
        #[case] homepage: Option<&str>,
    ) {
        let definition = definition(path, header, Layout::Legacy).unwrap();
        assert_eq!(definition.name, name);
        assert_eq!(definition.version, version);
        assert_eq!(definition.homepage.as_deref(), homepage);
    }

    #[rstest]
    #[case("react/index.d.ts", Some("react"))]
    #[case("react/v15/index.d.ts", Some("react/v15"))]
    #[case("react/react.d.ts", Some("react"))]
    #[case("react/react-2.0.d.ts", Some("react"))]
    #[case("react/lib/helpers.d.ts", None)]
    #[case("react/helpers.d.ts", None)]
    fn test_modern_definition(#[case] path: &str, #[case] name: Option<&str>) {
        let definition = definition(path, "", Layout::Modern);
        assert_eq!(definition.map(|d| d.name).as_deref(), name);
    }

    #[test]
    fn test_modern_layout_without_directory_falls_back() {
        let definition = definition("globals.d.ts", "", Layout::Modern).unwrap();
        assert_eq!(definition.name, "globals");
    }

    #[test]
    fn test_header_overrides_filename() {
        let header = "// Type definitions for Foo 2.3\n// Project: https://foo.dev\n";
        let definition = definition("foo/foo-1.0.d.ts", header, Layout::Legacy).unwrap();
        assert_eq!(definition.version, "2.3.0");
        assert_eq!(definition.homepage.as_deref(), Some("https://foo.dev"));
    }

    #[test]
    fn test_invalid_header_version_keeps_filename_version() {
        let header = "// Type definitions for Foo 9999999999999999999999.1\n";
        let definition = definition("foo/foo-1.0.d.ts", header, Layout::Legacy).unwrap();
        assert_eq!(definition.version, "1.0.0");
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let first = definition("foo/foo-1.2.x.d.ts", "", Layout::Legacy);
        for _ in 0..10 {
            assert_eq!(definition("foo/foo-1.2.x.d.ts", "", Layout::Legacy), first);
        }
    }

    #[test]
    fn test_location_prefix_matches_location() {
        let prefix = location_prefix("jquery/jquery.d.ts");
        assert!(location("jquery/jquery.d.ts", "deadbeef").starts_with(&prefix));
        assert!(!location("jquery/jquery.d.ts.bak", "deadbeef").starts_with(&prefix));
    }
}
