//! Read side: search, entries, versions and tags.
//!
//! Only versions that aren't deprecated are visible, except when a tag is
//! asked for by name.

use crate::Repository;
use crate::error::{ErrorKind, Result};
use crate::models::{Entry, EntryRow, SearchResults, Version, VersionRow};
use exn::ResultExt;
use sqlx::{QueryBuilder, Sqlite};
use std::cmp::Ordering;
use tracing::instrument;
use typereg_extract::models::Source;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Sort {
    #[default]
    Name,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Search parameters. Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Case-insensitive substring of the entry name.
    pub query: Option<String>,
    /// Exact entry name.
    pub name: Option<String>,
    /// Explicit sources; takes precedence over `ambient`.
    pub sources: Vec<Source>,
    /// `true` for ambient sources only, `false` for module sources only.
    pub ambient: Option<bool>,
    /// Negative offsets are treated as zero.
    pub offset: i64,
    /// Clamped to `1..=100`, defaults to 20.
    pub limit: Option<i64>,
    pub sort: Sort,
    pub order: Order,
}
impl SearchOptions {
    pub fn offset(&self) -> i64 {
        self.offset.max(0)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn sources(&self) -> &[Source] {
        match (self.sources.is_empty(), self.ambient) {
            (false, _) => &self.sources,
            (true, Some(true)) => &Source::AMBIENT,
            (true, Some(false)) => &Source::MAIN,
            (true, None) => &Source::ALL,
        }
    }

    /// Conditions shared by the page query and the total count.
    fn push_filters<'a>(&self, builder: &mut QueryBuilder<'a, Sqlite>) {
        builder.push(
            " FROM entries JOIN versions ON versions.entry_id = entries.id AND versions.deprecated IS NULL \
             WHERE entries.source IN (",
        );
        let mut sources = builder.separated(", ");
        for source in self.sources() {
            sources.push_bind(source.as_str());
        }
        sources.push_unseparated(")");
        if let Some(query) = &self.query {
            builder.push(" AND entries.name LIKE ").push_bind(format!("%{}%", escape_like(query)));
            builder.push(" ESCAPE '\\'");
        }
        if let Some(name) = &self.name {
            builder.push(" AND entries.name = ").push_bind(name.clone());
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Highest tag first; tags that somehow don't parse sort last.
fn compare_tags(a: &Version, b: &Version) -> Ordering {
    let a_tag = semver::Version::parse(&a.tag).ok();
    let b_tag = semver::Version::parse(&b.tag).ok();
    let by_tag = match (a_tag, b_tag) {
        (Some(a), Some(b)) => b.cmp_precedence(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_tag.then_with(|| b.updated.cmp(&a.updated))
}

impl Repository {
    /// One page of entries with at least one version that isn't deprecated.
    #[instrument(skip(self))]
    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResults> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(DISTINCT entries.id)");
        options.push_filters(&mut count);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;

        let mut page = QueryBuilder::<Sqlite>::new(
            "SELECT entries.name, entries.source, entries.homepage, entries.updated, COUNT(versions.id) AS versions",
        );
        options.push_filters(&mut page);
        page.push(" GROUP BY entries.id ORDER BY ");
        page.push(match options.sort {
            Sort::Name => "entries.name",
            Sort::Updated => "entries.updated",
        });
        page.push(match options.order {
            Order::Asc => " ASC",
            Order::Desc => " DESC",
        });
        page.push(", entries.id LIMIT ").push_bind(options.limit());
        page.push(" OFFSET ").push_bind(options.offset());
        let rows = page
            .build_query_as::<EntryRow>()
            .fetch_all(self.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        let results = rows.into_iter().map(Entry::try_from).collect::<Result<Vec<_>>>()?;
        Ok(SearchResults { results, total })
    }

    /// An entry and its number of active versions.
    ///
    /// Entries whose versions are all deprecated are not found.
    pub async fn get_entry(&self, source: Source, name: &str) -> Result<Entry> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry.sql"))
            .bind(source.as_str())
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => row.try_into(),
            None => exn::bail!(ErrorKind::NotFound(format!("{source}!{name}"))),
        }
    }

    /// Active versions of an entry, highest tag first, newest first among
    /// equal tags.
    ///
    /// `range` is an npm-style semver range matched against the nominal
    /// version. An entry without active versions is not found; a range that
    /// matches nothing yields an empty list.
    #[instrument(skip(self))]
    pub async fn get_versions(&self, source: Source, name: &str, range: Option<&str>) -> Result<Vec<Version>> {
        let range = range
            .map(|range| {
                node_semver::Range::parse(range).or_raise(|| ErrorKind::InvalidRange(range.to_string()))
            })
            .transpose()?;
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/get_versions.sql"))
            .bind(source.as_str())
            .bind(name)
            .fetch_all(self.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        if rows.is_empty() {
            exn::bail!(ErrorKind::NotFound(format!("{source}!{name}")));
        }
        let mut versions = rows.into_iter().map(Version::try_from).collect::<Result<Vec<_>>>()?;
        versions.sort_by(compare_tags);
        if let Some(range) = range {
            versions.retain(|v| {
                node_semver::Version::parse(&v.version).is_ok_and(|version| range.satisfies(&version))
            });
        }
        Ok(versions)
    }

    /// One version by its tag, deprecated or not.
    pub async fn get_tag(&self, source: Source, name: &str, tag: &str) -> Result<Version> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_tag.sql"))
            .bind(source.as_str())
            .bind(name)
            .bind(tag)
            .fetch_optional(self.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        match row {
            Some(row) => row.try_into(),
            None => exn::bail!(ErrorKind::NotFound(format!("{source}!{name}#{tag}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::Deprecation;
    use crate::{Database, Write};
    use rstest::rstest;
    use time::UtcDateTime;
    use time::macros::utc_datetime;
    use typereg_extract::models::RegistryVersion;

    const T1: UtcDateTime = utc_datetime!(2016-01-01 00:00:00);
    const T2: UtcDateTime = utc_datetime!(2016-02-01 00:00:00);
    const T3: UtcDateTime = utc_datetime!(2016-03-01 00:00:00);

    async fn publish(repo: &Repository, source: Source, name: &str, version: &str, at: UtcDateTime) -> i64 {
        let mut tx = repo.transaction().await.unwrap();
        let id = tx.upsert_entry(name, source, None, at).await.unwrap().id().unwrap();
        let version = RegistryVersion {
            version: version.to_string(),
            location: format!("loc:{name}@{version}#{}", at.unix_timestamp()),
            compiler: None,
            description: None,
        };
        let write = tx.upsert_version(id, &version, at).await.unwrap();
        assert!(matches!(write, Write::Applied(_)));
        tx.commit().await.unwrap();
        id
    }

    /// - npm/left-pad: 1.0.0 (T1), 1.1.0 (T2), 1.0.0 again (T3)
    /// - npm/lodash: 4.0.0 (T2)
    /// - dt/react: 15.0.1 (T1)
    /// - global/jquery: 1.0.0 (T1), deprecated at T2
    async fn fixture() -> Repository {
        let repo = Repository::from(&Database::connect_in_memory().await.unwrap());
        publish(&repo, Source::Npm, "left-pad", "1.0.0", T1).await;
        publish(&repo, Source::Npm, "left-pad", "1.1.0", T2).await;
        publish(&repo, Source::Npm, "left-pad", "1.0.0", T3).await;
        publish(&repo, Source::Npm, "lodash", "4.0.0", T2).await;
        publish(&repo, Source::Dt, "react", "15.0.1", T1).await;
        publish(&repo, Source::Global, "jquery", "1.0.0", T1).await;
        let mut tx = repo.transaction().await.unwrap();
        tx.deprecate(Deprecation::Entry { name: "jquery", source: Source::Global }, T2).await.unwrap();
        tx.commit().await.unwrap();
        repo
    }

    fn names(results: &SearchResults) -> Vec<&str> {
        results.results.iter().map(|e| e.name.as_str()).collect()
    }

    #[rstest]
    #[case(None, 20)]
    #[case(Some(0), 1)]
    #[case(Some(-5), 1)]
    #[case(Some(50), 50)]
    #[case(Some(500), 100)]
    fn test_limit_is_clamped(#[case] limit: Option<i64>, #[case] expected: i64) {
        let options = SearchOptions { limit, ..Default::default() };
        assert_eq!(options.limit(), expected);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[tokio::test]
    async fn test_search_all() {
        let repo = fixture().await;
        let results = repo.search(&SearchOptions::default()).await.unwrap();
        // jquery has no active versions.
        assert_eq!(names(&results), ["left-pad", "lodash", "react"]);
        assert_eq!(results.total, 3);
        assert_eq!(results.results[0].versions, 3);
        assert_eq!(results.results[0].homepage.as_deref(), Some("https://www.npmjs.com/package/left-pad"));
        assert_eq!(results.results[2].homepage, None);
    }

    #[tokio::test]
    async fn test_search_filters() {
        let repo = fixture().await;
        let ambient = SearchOptions { ambient: Some(true), ..Default::default() };
        assert_eq!(names(&repo.search(&ambient).await.unwrap()), ["react"]);
        let main = SearchOptions { ambient: Some(false), ..Default::default() };
        assert_eq!(names(&repo.search(&main).await.unwrap()), ["left-pad", "lodash"]);
        let query = SearchOptions { query: Some("PAD".to_string()), ..Default::default() };
        assert_eq!(names(&repo.search(&query).await.unwrap()), ["left-pad"]);
        let name = SearchOptions { name: Some("lodash".to_string()), ..Default::default() };
        assert_eq!(names(&repo.search(&name).await.unwrap()), ["lodash"]);
        let sources = SearchOptions { sources: vec![Source::Dt], ambient: Some(false), ..Default::default() };
        assert_eq!(names(&repo.search(&sources).await.unwrap()), ["react"]);
        let literal = SearchOptions { query: Some("%".to_string()), ..Default::default() };
        assert!(repo.search(&literal).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn test_search_paging_and_sorting() {
        let repo = fixture().await;
        let options = SearchOptions {
            sort: Sort::Updated,
            order: Order::Desc,
            limit: Some(2),
            ..Default::default()
        };
        let first = repo.search(&options).await.unwrap();
        assert_eq!(names(&first), ["left-pad", "lodash"]);
        assert_eq!(first.total, 3);
        let second = repo.search(&SearchOptions { offset: 2, ..options.clone() }).await.unwrap();
        assert_eq!(names(&second), ["react"]);
        assert_eq!(second.total, 3);
    }

    #[tokio::test]
    async fn test_get_entry() {
        let repo = fixture().await;
        let entry = repo.get_entry(Source::Npm, "left-pad").await.unwrap();
        assert_eq!(entry.versions, 3);
        assert_eq!(entry.updated, T3);
        let err = repo.get_entry(Source::Npm, "nope").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = repo.get_entry(Source::Global, "jquery").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_versions_order() {
        let repo = fixture().await;
        let versions = repo.get_versions(Source::Npm, "left-pad", None).await.unwrap();
        let order = versions.iter().map(|v| (v.version.as_str(), v.updated)).collect::<Vec<_>>();
        assert_eq!(order, [("1.1.0", T2), ("1.0.0", T3), ("1.0.0", T1)]);
    }

    #[rstest]
    #[case("^1.0.0", &["1.1.0", "1.0.0", "1.0.0"])]
    #[case("~1.0.0", &["1.0.0", "1.0.0"])]
    #[case(">=2", &[])]
    #[tokio::test]
    async fn test_get_versions_range(#[case] range: &str, #[case] expected: &[&str]) {
        let repo = fixture().await;
        let versions = repo.get_versions(Source::Npm, "left-pad", Some(range)).await.unwrap();
        assert_eq!(versions.iter().map(|v| v.version.as_str()).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_get_versions_errors() {
        let repo = fixture().await;
        let err = repo.get_versions(Source::Npm, "left-pad", Some("not a range!")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRange(_)));
        let err = repo.get_versions(Source::Global, "jquery", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_tag() {
        let repo = fixture().await;
        let version = repo.get_tag(Source::Npm, "left-pad", "1.1.0+20160201000000").await.unwrap();
        assert_eq!(version.version, "1.1.0");
        assert_eq!(version.deprecated, None);
        // Deprecated tags are still served.
        let version = repo.get_tag(Source::Global, "jquery", "1.0.0+20160101000000").await.unwrap();
        assert_eq!(version.deprecated, Some(T2));
        let err = repo.get_tag(Source::Npm, "left-pad", "9.9.9").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
