use crate::error::{Error, ErrorKind};
use crate::models::{Entry, Version};
use exn::ResultExt;
use time::UtcDateTime;
use typereg_extract::models::Source;

fn timestamp(seconds: i64, field: &'static str) -> Result<UtcDateTime, Error> {
    UtcDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidData(field))
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) name: String,
    pub(crate) source: String,
    pub(crate) homepage: Option<String>,
    pub(crate) updated: i64,
    pub(crate) versions: i64,
}
impl TryFrom<EntryRow> for Entry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let source = row.source.parse::<Source>().or_raise(|| ErrorKind::InvalidData("source"))?;
        Ok(Self {
            homepage: row.homepage.or_else(|| source.default_homepage(&row.name)),
            name: row.name,
            source,
            updated: timestamp(row.updated, "entry updated")?,
            versions: row.versions,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    pub(crate) version: String,
    pub(crate) tag: String,
    pub(crate) compiler: Option<String>,
    pub(crate) location: String,
    pub(crate) description: Option<String>,
    pub(crate) updated: i64,
    #[sqlx(default)]
    pub(crate) deprecated: Option<i64>,
}
impl TryFrom<VersionRow> for Version {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            version: row.version,
            tag: row.tag,
            compiler: row.compiler,
            location: row.location,
            description: row.description,
            updated: timestamp(row.updated, "version updated")?,
            deprecated: row.deprecated.map(|d| timestamp(d, "version deprecated")).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_row_default_homepage() {
        let row = EntryRow {
            name: "left-pad".to_string(),
            source: "npm".to_string(),
            homepage: None,
            updated: 1_456_833_600,
            versions: 1,
        };
        let entry = Entry::try_from(row).unwrap();
        assert_eq!(entry.homepage.as_deref(), Some("https://www.npmjs.com/package/left-pad"));
        assert_eq!(entry.source, Source::Npm);
    }

    #[test]
    fn test_entry_row_unknown_source() {
        let row = EntryRow {
            name: "x".to_string(),
            source: "cdn".to_string(),
            homepage: None,
            updated: 0,
            versions: 0,
        };
        let err = Entry::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("source")));
    }
}
