mod rows;

pub(crate) use self::rows::{EntryRow, VersionRow};
use serde::Serialize;
use time::UtcDateTime;
use typereg_extract::models::Source;

/// A package entry as served by the read side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub name: String,
    pub source: Source,
    /// Declared homepage, or the conventional one for `npm`/`github` entries.
    pub homepage: Option<String>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub updated: UtcDateTime,
    /// Number of versions that aren't deprecated.
    pub versions: i64,
}

/// One tagged version of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    pub version: String,
    pub tag: String,
    pub compiler: Option<String>,
    pub location: String,
    pub description: Option<String>,
    #[serde(serialize_with = "timestamp::serialize")]
    pub updated: UtcDateTime,
    #[serde(serialize_with = "timestamp::serialize_option")]
    pub deprecated: Option<UtcDateTime>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub results: Vec<Entry>,
    /// Number of matching entries across all pages.
    pub total: i64,
}

/// A processed commit of an upstream repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitMark {
    pub commit: String,
    #[serde(serialize_with = "timestamp::serialize")]
    pub date: UtcDateTime,
}

/// Timestamps go over the wire as RFC 3339 strings.
mod timestamp {
    use serde::Serializer;
    use serde::ser::Error;
    use time::format_description::well_known::Rfc3339;
    use time::{OffsetDateTime, UtcDateTime};

    pub(super) fn serialize<S: Serializer>(at: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = OffsetDateTime::from(*at).format(&Rfc3339).map_err(S::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub(super) fn serialize_option<S: Serializer>(at: &Option<UtcDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => serialize(at, serializer),
            None => serializer.serialize_none(),
        }
    }
}
