//! Write side of the store: guarded upserts, deprecation and watermarks.
//!
//! Entries and versions are only ever written through a [`Transaction`], so
//! everything one upstream event changes is applied together or not at all.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::CommitMark;
use crate::tag::tag;
use crate::upsert::{ENTRY_SQL, VERSION_SQL, Write};
use exn::ResultExt;
use sqlx::{Sqlite, SqlitePool};
use time::UtcDateTime;
use tracing::instrument;
use typereg_extract::models::{RegistryVersion, Source};

/// Which versions a deprecation retires.
///
/// Whatever the scope, only versions older than the event are touched, and
/// a version's `deprecated` timestamp only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deprecation<'a> {
    /// Every version of an entry; the registry file was deleted.
    Entry { name: &'a str, source: Source },
    /// Every version of an entry whose location isn't in `locations`; the
    /// registry file was re-read and these are the locations it still lists.
    EntryExcept { entry_id: i64, locations: &'a [String] },
    /// Every version whose location starts with the prefix; a DefinitelyTyped
    /// file was changed or deleted.
    LocationPrefix(&'a str),
}
impl Deprecation<'_> {
    fn scope(&self) -> &'static str {
        match self {
            Self::Entry { .. } => "entry",
            Self::EntryExcept { .. } => "entry-except",
            Self::LocationPrefix(_) => "location-prefix",
        }
    }

    fn key(&self) -> String {
        match self {
            Self::Entry { name, source } => format!("{source}/{name}"),
            Self::EntryExcept { entry_id, .. } => entry_id.to_string(),
            Self::LocationPrefix(prefix) => prefix.to_string(),
        }
    }
}

/// Repository for entries, versions and commit watermarks.
///
/// # Relationships
///
/// - An entry is unique per (name, source) and is never deleted
/// - A version belongs to exactly one entry and is unique per (entry, tag)
/// - Deprecating a version sets a timestamp; the row is kept
/// - Commits are recorded per upstream URL; the newest is the watermark
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction for all the writes belonging to one event.
    ///
    /// Dropping the transaction without calling [`Transaction::commit`]
    /// rolls everything back.
    pub async fn transaction(&self) -> Result<Transaction> {
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(Transaction { tx })
    }

    // =========================================================================
    // Watermarks
    // =========================================================================

    /// Record that every change in `commit` has been durably queued.
    ///
    /// Recording the same commit again is a no-op.
    #[instrument(skip(self))]
    pub async fn record_commit(&self, repo_url: &str, commit: &str, date: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/record_commit.sql"))
            .bind(repo_url)
            .bind(commit)
            .bind(date.unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Newest recorded commit (by commit date, then by recording order).
    ///
    /// `None` means nothing has been processed yet: start from the beginning.
    pub async fn latest_commit(&self, repo_url: &str) -> Result<Option<CommitMark>> {
        let row: Option<(String, i64)> = sqlx::query_as(include_str!("../queries/latest_commit.sql"))
            .bind(repo_url)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|(commit, date)| {
            let date = UtcDateTime::from_unix_timestamp(date).or_raise(|| ErrorKind::InvalidData("commit date"))?;
            Ok(CommitMark { commit, date })
        })
        .transpose()
    }
}

/// All the writes for one event.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}
impl Transaction {
    /// Insert or update the entry for (name, source).
    ///
    /// The homepage and `updated` are only overwritten when `at` is not older
    /// than what's stored; either way the entry id is returned.
    pub async fn upsert_entry(
        &mut self,
        name: &str,
        source: Source,
        homepage: Option<&str>,
        at: UtcDateTime,
    ) -> Result<Write> {
        let (upsert, lookup) = &*ENTRY_SQL;
        let applied: Option<i64> = sqlx::query_scalar(upsert)
            .bind(name)
            .bind(source.as_str())
            .bind(homepage)
            .bind(at.unix_timestamp())
            .fetch_optional(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if let Some(id) = applied {
            return Ok(Write::Applied(id));
        }
        let id: i64 = sqlx::query_scalar(lookup)
            .bind(name)
            .bind(source.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::debug!(%source, name, "stale entry write ignored");
        Ok(Write::Stale(id))
    }

    /// Insert or update one version of an entry, tagged by `at` and its compiler.
    ///
    /// Versions that can't be tagged are [`Rejected`](Write::Rejected). A new
    /// version immediately picks up any recorded deprecation that is newer
    /// than it, so replaying an old event never resurrects a retired version.
    ///
    /// A live row with the same version, compiler and location is reused
    /// under its original tag, so re-reading an unchanged registry document
    /// only moves its `updated` forward.
    pub async fn upsert_version(&mut self, entry_id: i64, version: &RegistryVersion, at: UtcDateTime) -> Result<Write> {
        let Some(tag) = tag(&version.version, at, version.compiler.as_deref()) else {
            tracing::debug!(entry_id, version = %version.version, "version can't be tagged, skipping");
            return Ok(Write::Rejected);
        };
        let existing: Option<i64> = sqlx::query_scalar(include_str!("../queries/find_version.sql"))
            .bind(entry_id)
            .bind(&version.version)
            .bind(&version.location)
            .bind(version.compiler.as_deref())
            .bind(at.unix_timestamp())
            .fetch_optional(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if let Some(id) = existing {
            let refreshed = sqlx::query(include_str!("../queries/refresh_version.sql"))
                .bind(id)
                .bind(version.description.as_deref())
                .bind(at.unix_timestamp())
                .execute(&mut *self.tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            if refreshed.rows_affected() == 0 {
                tracing::debug!(entry_id, id, "stale version write ignored");
                return Ok(Write::Stale(id));
            }
            return Ok(Write::Applied(id));
        }
        let (upsert, lookup) = &*VERSION_SQL;
        let applied: Option<i64> = sqlx::query_scalar(upsert)
            .bind(entry_id)
            .bind(&version.version)
            .bind(&tag)
            .bind(version.compiler.as_deref())
            .bind(&version.location)
            .bind(version.description.as_deref())
            .bind(at.unix_timestamp())
            .fetch_optional(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let Some(id) = applied else {
            let id: i64 = sqlx::query_scalar(lookup)
                .bind(entry_id)
                .bind(&tag)
                .fetch_one(&mut *self.tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            tracing::debug!(entry_id, tag, "stale version write ignored");
            return Ok(Write::Stale(id));
        };
        sqlx::query(include_str!("../queries/apply_deprecations.sql"))
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Write::Applied(id))
    }

    /// Retire the versions in `scope` that are older than `at`.
    ///
    /// The deprecation itself is recorded too, for versions of the same scope
    /// that only get written later. Returns how many existing versions were
    /// (re-)deprecated.
    pub async fn deprecate(&mut self, scope: Deprecation<'_>, at: UtcDateTime) -> Result<u64> {
        let at = at.unix_timestamp();
        let locations = match scope {
            Deprecation::EntryExcept { locations, .. } => {
                Some(serde_json::to_string(locations).or_raise(|| ErrorKind::InvalidData("locations"))?)
            },
            _ => None,
        };
        sqlx::query(include_str!("../queries/record_deprecation.sql"))
            .bind(scope.scope())
            .bind(scope.key())
            .bind(locations.as_deref())
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let query = match scope {
            Deprecation::Entry { name, source } => sqlx::query(include_str!("../queries/deprecate_entry.sql"))
                .bind(name)
                .bind(source.as_str())
                .bind(at),
            Deprecation::EntryExcept { entry_id, .. } => {
                sqlx::query(include_str!("../queries/deprecate_entry_except.sql"))
                    .bind(entry_id)
                    .bind(locations.as_deref())
                    .bind(at)
            },
            Deprecation::LocationPrefix(prefix) => {
                sqlx::query(include_str!("../queries/deprecate_location_prefix.sql")).bind(prefix).bind(at)
            },
        };
        let result = query.execute(&mut *self.tx).await.or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.or_raise(|| ErrorKind::Database)
    }
}
