//! Connection pool for the registry store.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

// File jobs upsert concurrently; every connection beyond the single writer
// is there for readers and for writers waiting on the busy timeout.
const POOL_SIZE: u32 = 8;
// File jobs for one commit land together and all want the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

/// Connection settings `SqliteConnectOptions` has no setter for, applied to
/// every pooled connection as it opens.
const TUNING: &[(&str, i64)] = &[
    // Pages; a commit's worth of version rows checkpoints in one go.
    ("wal_autocheckpoint", 1000),
    // Negative means KiB: 16 MiB of page cache per connection.
    ("cache_size", -16384),
    // 2 = MEMORY, for the sorts behind search and version listings.
    ("temp_store", 2),
    ("analysis_limit", 400),
];

/// Database connection pool for the registry store.
///
/// Entries, versions, deprecations and commit watermarks all live here. The
/// store is the single source of truth for everything the read side serves.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect using a connection string such as `sqlite://typereg.db`.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    #[instrument(skip(url))]
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url.as_ref()).or_raise(|| ErrorKind::Database)?;
        Self::open(options.create_if_missing(true), POOL_SIZE).await
    }

    /// Private, throwaway database. The pipeline's tests use it too, so it
    /// isn't behind `#[cfg(test)]`.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every connection to ":memory:" is its own database, so the pool
        // must never open a second one.
        Self::open(SqliteConnectOptions::new().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, pool_size: u32) -> Result<Self> {
        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .auto_vacuum(SqliteAutoVacuum::None);
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _| Box::pin(async move { tune(conn).await }))
            .max_connections(pool_size)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// The queue may share this database file, so migrations applied by the
    /// queue are expected and ignored.
    #[instrument("performing store migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for checked-out connections, then closes the pool for good.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

async fn tune(conn: &mut SqliteConnection) -> sqlx::Result<()> {
    for (pragma, value) in TUNING {
        sqlx::query(&format!("PRAGMA {pragma} = {value}")).execute(&mut *conn).await?;
    }
    Ok(())
}
