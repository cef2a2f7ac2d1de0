use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::sync::LazyLock;

/// Loose version token found in file names and headers: `1.2`, `1.x`, `1.4+`,
/// `1.2.x`, `1.2.3-beta`.
const VERSION: &str = r"\d+\.(?:\d+\+?|x)(?:\.(?:\d+|x)(?:-[^-\s]+)?)?";

pub(crate) const DEFINITION_EXTENSION: &str = ".d.ts";
pub(crate) const REGISTRY_EXTENSION: &str = ".json";
pub(crate) const DEFAULT_VERSION: &str = "0.0.0";
/// Secondary files inside a modern package directory are only indexed when
/// they are the package entrypoint.
pub(crate) const ENTRYPOINT: &str = "index";
pub(crate) const LOCATION_PREFIX: &str = "github:DefinitelyTyped/DefinitelyTyped/";

/// How many bytes of a definition file are needed to find its header.
pub const HEADER_BYTES: usize = 1024;
/// Upper bound for a registry document; anything larger is malformed anyway.
pub const REGISTRY_BYTES: usize = 400 * 1024;
/// Marks a directory as a modern one-package-per-directory layout.
pub const PROJECT_CONFIG: &str = "tsconfig.json";

/// Rewrites applied, in order, to turn a loose version into a semver candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Rewrite {
    /// `4.x` -> `4.0`, `1.2.x` -> `1.2.0`
    WildcardSegment,
    /// `1.4+` -> `1.4.0`
    TrailingPlus,
    /// `1.2` -> `1.2.0`
    MissingPatch,
}
pub(crate) const VERSION_REWRITES: &[Rewrite] = &[Rewrite::WildcardSegment, Rewrite::TrailingPlus, Rewrite::MissingPatch];

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

macro_rules! globset {
    ($name:ident, [$($pattern:expr),+ $(,)?]) => {
        pub(crate) static $name: LazyLock<GlobSet> = LazyLock::new(|| {
            let mut builder = GlobSetBuilder::new();
            // `*` must not cross directories, same as the shell.
            $(builder.add(GlobBuilder::new($pattern).literal_separator(true).build().unwrap());)+
            builder.build().unwrap()
        });
    };
}

regex!(HEADER_VERSION_REGEX, format!(r"(?im)^// *Type definitions for.+?v?({VERSION})").as_str());
regex!(HEADER_PROJECT_REGEX, r"(?im)^// *Project: *(\S+)");
regex!(FILE_VERSION_REGEX, format!(r"-{VERSION}$").as_str());
regex!(MISSING_PATCH_REGEX, r"^\d+\.\d+$");
regex!(SANITIZE_REGEX, r"[^a-z0-9]|js$");

globset!(DEFINITION_GLOBS, ["**/*.d.ts"]);
globset!(REGISTRY_GLOBS, ["{npm,github,bower,common,shared,lib,env,global}/**/*.json"]);
