//! JSON registry documents.
//!
//! Each file at `<source>/<name>.json` describes one package. The `versions`
//! map is keyed by semver, and each value is either a bare location, a
//! detailed object, or a list of either.

use exn::{OptionExt, ResultExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::consts::REGISTRY_EXTENSION;
use crate::error::{ErrorKind, Result};
use crate::models::{RegistryEntry, RegistryVersion, Source};

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    versions: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLocation {
    Bare(String),
    Detailed {
        location: String,
        #[serde(default)]
        compiler: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(RawLocation),
    Many(Vec<RawLocation>),
}

/// Split a registry path into its source namespace and package name.
///
/// Scoped package names keep their inner `/`.
///
/// ```
/// use typereg_extract::models::Source;
/// use typereg_extract::registry_path;
/// assert_eq!(registry_path("npm/left-pad.json").unwrap(), (Source::Npm, "left-pad".to_string()));
/// assert_eq!(registry_path("npm/@scope/pkg.json").unwrap(), (Source::Npm, "@scope/pkg".to_string()));
/// assert!(registry_path("typings/foo.json").is_err());
/// ```
pub fn registry_path(path: &str) -> Result<(Source, String)> {
    let stem = path.strip_suffix(REGISTRY_EXTENSION).unwrap_or(path);
    let (namespace, name) = stem
        .split_once('/')
        .filter(|(_, name)| !name.is_empty())
        .ok_or_raise(|| ErrorKind::UnknownSource(path.to_string()))?;
    Ok((namespace.parse::<Source>()?, name.to_string()))
}

/// Parse a registry document.
///
/// Version keys that aren't valid semver are skipped, not fatal; everything
/// else that doesn't fit the expected shape makes the whole document
/// malformed.
#[instrument(skip(bytes), fields(size = bytes.len()))]
pub fn registry_entry(bytes: &[u8]) -> Result<RegistryEntry> {
    let raw: RawEntry = serde_json::from_slice(bytes).or_raise(|| ErrorKind::MalformedEntry)?;
    let versions = match raw.versions {
        Some(Value::Object(map)) => Some(self::versions(map)?),
        _ => None,
    };
    Ok(RegistryEntry { homepage: raw.homepage, versions })
}

fn versions(map: Map<String, Value>) -> Result<Vec<RegistryVersion>> {
    let mut versions = Vec::new();
    for (version, value) in map {
        if semver::Version::parse(&version).is_err() {
            tracing::warn!(version, "skipping invalid version");
            continue;
        }
        let locations = match serde_json::from_value(value).or_raise(|| ErrorKind::ParseError {
            field: "versions",
            value: version.clone(),
        })? {
            OneOrMany::One(location) => vec![location],
            OneOrMany::Many(locations) => locations,
        };
        versions.extend(locations.into_iter().map(|location| match location {
            RawLocation::Bare(location) => RegistryVersion::bare(&version, location),
            RawLocation::Detailed { location, compiler, description } => RegistryVersion {
                version: version.clone(),
                location,
                compiler,
                description,
            },
        }));
    }
    Ok(versions)
}
