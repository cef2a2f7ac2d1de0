use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use serde_json::Value;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use time::UtcDateTime;
use tracing::{debug, instrument};

use super::{Job, JobState, NewJob, Transport};
use crate::error::{Error, ErrorKind, Result};

const MAX_CONNECTIONS: u32 = 4;

// ============================================================================
// Queries
// ============================================================================

const ENQUEUE: &str = include_str!("../../queries/enqueue.sql");
const EXISTS: &str = include_str!("../../queries/exists.sql");
const CLAIM: &str = include_str!("../../queries/claim.sql");
const CLAIM_ORDERED: &str = include_str!("../../queries/claim_ordered.sql");
const HEARTBEAT: &str = include_str!("../../queries/heartbeat.sql");
const COMPLETE: &str = include_str!("../../queries/complete.sql");
const PRUNE_COMPLETED: &str = include_str!("../../queries/prune_completed.sql");
const DELETE: &str = include_str!("../../queries/delete.sql");
const FAIL: &str = include_str!("../../queries/fail.sql");
const RELEASE: &str = include_str!("../../queries/release.sql");
const REQUEUE_STUCK: &str = include_str!("../../queries/requeue_stuck.sql");
const LAST_RESULT: &str = include_str!("../../queries/last_result.sql");
const STATE: &str = include_str!("../../queries/state.sql");

fn now_ms() -> i64 {
    (UtcDateTime::now().unix_timestamp_nanos() / 1_000_000) as i64
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    kind: String,
    payload: String,
    attempts: i64,
    max_attempts: i64,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            kind: row.kind,
            payload: serde_json::from_str(&row.payload).or_raise(|| ErrorKind::Payload)?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            max_attempts: u32::try_from(row.max_attempts).unwrap_or(0),
        })
    }
}

/// Point-in-time view of a single job, for inspection.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct JobStatus {
    pub state: JobState,
    pub attempts: i64,
    pub error: Option<String>,
}

// ============================================================================
// Connection
// ============================================================================

/// Job queue persisted in a SQLite `jobs` table.
///
/// Every state change is a single statement (or a short transaction), so any
/// number of consumers, in this process or others, can share one database.
#[derive(Debug, Clone)]
pub struct SqliteTransport {
    pool: SqlitePool,
}

impl SqliteTransport {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let transport = Self { pool };
        transport.migrate().await?;
        Ok(transport)
    }

    /// Connect using a connection string such as `sqlite://queue.db`.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    #[instrument(skip(url))]
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url.as_ref()).or_raise(|| ErrorKind::Database)?;
        let options = Self::base_options(options).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory queue. Not `#[cfg(test)]`, other crates use
    /// this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options(SqliteConnectOptions::new().filename(":memory:"));
        Self::new(options, Some(1)).await
    }

    fn base_options(options: SqliteConnectOptions) -> SqliteConnectOptions {
        options
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Claims from every consumer contend for the write lock.
            .busy_timeout(Duration::from_millis(1500))
    }

    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// The store may share this database file, so its migrations are
    /// expected and ignored.
    #[instrument("performing queue migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current state of a job, or `None` once it has been removed.
    pub async fn status(&self, id: i64) -> Result<Option<JobStatus>> {
        sqlx::query_as(STATE)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

// ============================================================================
// Transport
// ============================================================================

#[async_trait]
impl Transport for SqliteTransport {
    async fn enqueue(&self, job: NewJob) -> Result<i64> {
        let payload = serde_json::to_string(&job.payload).or_raise(|| ErrorKind::Payload)?;
        sqlx::query_scalar(ENQUEUE)
            .bind(&job.kind)
            .bind(payload)
            .bind(i64::from(job.max_attempts))
            .bind(now_ms())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn enqueue_all(&self, jobs: Vec<NewJob>) -> Result<Vec<i64>> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut ids = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let payload = serde_json::to_string(&job.payload).or_raise(|| ErrorKind::Payload)?;
            let id: i64 = sqlx::query_scalar(ENQUEUE)
                .bind(&job.kind)
                .bind(payload)
                .bind(i64::from(job.max_attempts))
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            ids.push(id);
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(ids)
    }

    async fn exists(&self, kind: &str) -> Result<bool> {
        sqlx::query_scalar(EXISTS)
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn claim(&self, kind: &str, ordered: bool) -> Result<Option<Job>> {
        let sql = if ordered { CLAIM_ORDERED } else { CLAIM };
        let row: Option<JobRow> = sqlx::query_as(sql)
            .bind(kind)
            .bind(now_ms())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Job::try_from).transpose()
    }

    async fn heartbeat(&self, id: i64, attempt: u32) -> Result<()> {
        sqlx::query(HEARTBEAT)
            .bind(id)
            .bind(now_ms())
            .bind(i64::from(attempt))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn complete(&self, id: i64, attempt: u32, result: Option<&Value>) -> Result<()> {
        let not_held = || ErrorKind::NotHeld { id, attempt };
        let Some(result) = result else {
            let deleted = sqlx::query(DELETE)
                .bind(id)
                .bind(i64::from(attempt))
                .execute(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
            if deleted == 0 {
                exn::bail!(not_held());
            }
            return Ok(());
        };
        let result = serde_json::to_string(result).or_raise(|| ErrorKind::Payload)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let kind: Option<String> = sqlx::query_scalar(COMPLETE)
            .bind(id)
            .bind(result)
            .bind(now_ms())
            .bind(i64::from(attempt))
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let kind = kind.ok_or_raise(not_held)?;
        let pruned = sqlx::query(PRUNE_COMPLETED)
            .bind(&kind)
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        debug!(id, kind, pruned, "kept job result");
        Ok(())
    }

    async fn fail(&self, id: i64, attempt: u32, error: &str, retry_after: Option<Duration>) -> Result<JobState> {
        let state: Option<JobState> = sqlx::query_scalar(FAIL)
            .bind(id)
            .bind(error)
            .bind(retry_after.map(millis))
            .bind(now_ms())
            .bind(i64::from(attempt))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        state.ok_or_raise(|| ErrorKind::NotHeld { id, attempt })
    }

    async fn release(&self, id: i64, attempt: u32) -> Result<()> {
        sqlx::query(RELEASE)
            .bind(id)
            .bind(now_ms())
            .bind(i64::from(attempt))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn requeue_stuck(&self, timeout: Duration) -> Result<u64> {
        let now = now_ms();
        let requeued = sqlx::query(REQUEUE_STUCK)
            .bind(now)
            .bind(now.saturating_sub(millis(timeout)))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        Ok(requeued)
    }

    async fn last_result(&self, kind: &str) -> Result<Option<Value>> {
        let raw: Option<String> = sqlx::query_scalar(LAST_RESULT)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        raw.map(|raw| serde_json::from_str(&raw).or_raise(|| ErrorKind::Payload))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn job(kind: &str, n: u32) -> NewJob {
        NewJob {
            kind: kind.to_string(),
            payload: json!({ "n": n }),
            max_attempts: 3,
        }
    }

    async fn transport() -> SqliteTransport {
        SqliteTransport::connect_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_claim_hands_out_each_job_once() {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();

        let claimed = queue.claim("files", false).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.payload, json!({ "n": 1 }));
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.max_attempts, 3);
        assert!(queue.claim("files", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_filters_by_kind() {
        let queue = transport().await;
        queue.enqueue(job("commits", 1)).await.unwrap();
        assert!(queue.claim("files", false).await.unwrap().is_none());
        assert!(queue.claim("commits", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enqueue_all_preserves_order() {
        let queue = transport().await;
        let ids = queue.enqueue_all((1..=3).map(|n| job("files", n)).collect()).await.unwrap();
        assert_eq!(ids.len(), 3);
        for (expected, id) in (1..=3).zip(ids) {
            let claimed = queue.claim("files", false).await.unwrap().unwrap();
            assert_eq!(claimed.id, id);
            assert_eq!(claimed.payload, json!({ "n": expected }));
        }
    }

    #[tokio::test]
    async fn test_ordered_claim_is_blocked_by_active_head() {
        let queue = transport().await;
        let first = queue.enqueue(job("commits", 1)).await.unwrap();
        queue.enqueue(job("commits", 2)).await.unwrap();

        assert_eq!(queue.claim("commits", true).await.unwrap().unwrap().id, first);
        assert!(queue.claim("commits", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ordered_claim_waits_for_head_backoff() {
        let queue = transport().await;
        let first = queue.enqueue(job("commits", 1)).await.unwrap();
        let second = queue.enqueue(job("commits", 2)).await.unwrap();

        queue.claim("commits", true).await.unwrap().unwrap();
        let state = queue.fail(first, 1, "busy", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(state, JobState::Queued);

        // Ordered consumers wait for the head; unordered ones skip ahead.
        assert!(queue.claim("commits", true).await.unwrap().is_none());
        assert_eq!(queue.claim("commits", false).await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_ordered_claim_moves_past_failed_head() {
        let queue = transport().await;
        let first = queue.enqueue(job("commits", 1)).await.unwrap();
        let second = queue.enqueue(job("commits", 2)).await.unwrap();

        queue.claim("commits", true).await.unwrap().unwrap();
        assert_eq!(queue.fail(first, 1, "broken", None).await.unwrap(), JobState::Failed);
        assert_eq!(queue.claim("commits", true).await.unwrap().unwrap().id, second);
    }

    #[rstest]
    #[case::retry_allowed(1, JobState::Queued)]
    #[case::attempts_exhausted(3, JobState::Failed)]
    #[tokio::test]
    async fn test_fail_respects_max_attempts(#[case] runs: u32, #[case] expected: JobState) {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();
        let mut state = JobState::Queued;
        for _ in 0..runs {
            let run = queue.claim("files", false).await.unwrap().unwrap();
            state = queue.fail(id, run.attempts, "flaky", Some(Duration::ZERO)).await.unwrap();
        }
        assert_eq!(state, expected);

        let status = queue.status(id).await.unwrap().unwrap();
        assert_eq!(status.state, expected);
        assert_eq!(status.attempts, i64::from(runs));
        assert_eq!(status.error.as_deref(), Some("flaky"));
    }

    #[tokio::test]
    async fn test_fail_unknown_job() {
        let queue = transport().await;
        let err = queue.fail(42, 1, "gone", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotHeld { id: 42, attempt: 1 }));
    }

    #[tokio::test]
    async fn test_superseded_run_cannot_touch_job() {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();
        let stale = queue.claim("files", false).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.requeue_stuck(Duration::from_millis(5)).await.unwrap(), 1);
        let current = queue.claim("files", false).await.unwrap().unwrap();
        assert_eq!(current.attempts, stale.attempts + 1);

        // The first run comes back after its job was handed to the second.
        let err = queue.complete(id, stale.attempts, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotHeld { .. }));
        let err = queue.complete(id, stale.attempts, Some(&json!({ "commit": "old" }))).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotHeld { .. }));
        let err = queue.fail(id, stale.attempts, "late", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotHeld { .. }));
        queue.release(id, stale.attempts).await.unwrap();
        queue.heartbeat(id, stale.attempts).await.unwrap();

        let status = queue.status(id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Active);
        assert_eq!(status.attempts, i64::from(current.attempts));
        assert_eq!(status.error, None);

        queue.complete(id, current.attempts, None).await.unwrap();
        assert!(queue.status(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_without_result_removes_job() {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();
        queue.claim("files", false).await.unwrap().unwrap();
        queue.complete(id, 1, None).await.unwrap();

        assert!(queue.status(id).await.unwrap().is_none());
        assert!(!queue.exists("files").await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_keeps_newest_result_only() {
        let queue = transport().await;
        assert_eq!(queue.last_result("resync").await.unwrap(), None);

        let mut ids = Vec::new();
        for n in 1..=2 {
            let id = queue.enqueue(job("resync", n)).await.unwrap();
            queue.claim("resync", false).await.unwrap().unwrap();
            queue.complete(id, 1, Some(&json!({ "commit": format!("c{n}") }))).await.unwrap();
            ids.push(id);
        }

        assert_eq!(queue.last_result("resync").await.unwrap(), Some(json!({ "commit": "c2" })));
        assert!(queue.status(ids[0]).await.unwrap().is_none());
        assert_eq!(queue.status(ids[1]).await.unwrap().unwrap().state, JobState::Completed);
        // Completed jobs don't count as pending work.
        assert!(!queue.exists("resync").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_does_not_count_the_run() {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();
        queue.claim("files", false).await.unwrap().unwrap();
        queue.release(id, 1).await.unwrap();

        let status = queue.status(id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Queued);
        assert_eq!(status.attempts, 0);
        assert_eq!(queue.claim("files", false).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_requeue_stuck() {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();
        queue.claim("files", false).await.unwrap().unwrap();

        // A fresh heartbeat is not stuck.
        assert_eq!(queue.requeue_stuck(Duration::from_secs(60)).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.requeue_stuck(Duration::from_millis(5)).await.unwrap(), 1);
        assert_eq!(queue.status(id).await.unwrap().unwrap().state, JobState::Queued);
        assert!(queue.claim("files", false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_job_alive() {
        let queue = transport().await;
        let id = queue.enqueue(job("files", 1)).await.unwrap();
        queue.claim("files", false).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.heartbeat(id, 1).await.unwrap();
        assert_eq!(queue.requeue_stuck(Duration::from_millis(30)).await.unwrap(), 0);
        assert_eq!(queue.status(id).await.unwrap().unwrap().state, JobState::Active);
    }

    #[tokio::test]
    async fn test_stuck_job_out_of_attempts_fails() {
        let queue = transport().await;
        let id = queue
            .enqueue(NewJob { max_attempts: 1, ..job("files", 1) })
            .await
            .unwrap();
        queue.claim("files", false).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.requeue_stuck(Duration::from_millis(5)).await.unwrap(), 1);
        let status = queue.status(id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("heartbeat lost"));
    }

    #[tokio::test]
    async fn test_shared_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let producer = SqliteTransport::connect(&url).await.unwrap();
        let consumer = SqliteTransport::connect(&url).await.unwrap();

        producer.enqueue(job("files", 1)).await.unwrap();
        assert!(consumer.exists("files").await.unwrap());
        assert!(consumer.claim("files", false).await.unwrap().is_some());
        producer.close().await;
        consumer.close().await;
    }
}
