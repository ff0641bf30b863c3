//! Durable state for the pool watcher.
//!
//! Two tables on an embedded SQLite database: per-pool, per-epoch leader
//! schedules and the singleton scan-progress cursor. The connection pool
//! is capped at one open connection, serializing all writes.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;

pub mod progress;
pub mod schedule;

pub use progress::{Progress, ProgressStore};
pub use schedule::{Schedule, ScheduleStore};

/// Bound on any single storage operation.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the requested key. Distinct from "zero rows
    /// matched" conditions, which callers treat as normal control flow.
    #[error("no record found")]
    NotFound,
    /// The underlying database failed.
    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),
    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schedules (
    pool_id  TEXT    NOT NULL,
    epoch    INTEGER NOT NULL,
    slots    TEXT    NOT NULL,
    slot_qty INTEGER NOT NULL,
    hash     TEXT    NOT NULL,
    PRIMARY KEY (pool_id, epoch)
);

CREATE TABLE IF NOT EXISTS watcher_progress (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    epoch       INTEGER NOT NULL,
    slot        INTEGER NOT NULL,
    last_update TEXT    NOT NULL
);
";

/// Open (creating if necessary) the watcher database at `path` and
/// bootstrap its schema.
pub async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(15))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    debug!(path = %path.display(), "database ready");
    Ok(pool)
}

/// Open an ephemeral in-memory database with the schema bootstrapped.
/// Intended for tests; nothing survives the pool being dropped.
pub async fn connect_in_memory() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().in_memory(true))
        .await?;
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn on_disk_database_survives_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watcher.db");

        let pool = connect(&path).await.unwrap();
        ProgressStore::new(pool.clone()).save(450, 1000).await.unwrap();
        ScheduleStore::new(pool.clone()).put("pool1", 450, &[1000, 2000], 2, "beef").await.unwrap();
        pool.close().await;

        let pool = connect(&path).await.unwrap();
        let progress = ProgressStore::new(pool.clone()).load().await.unwrap().unwrap();
        assert_eq!(progress.epoch, 450);
        assert_eq!(progress.slot, 1000);

        let schedule = ScheduleStore::new(pool).get("pool1", 450).await.unwrap();
        assert_eq!(schedule.slots, vec![1000, 2000]);
        assert_eq!(schedule.quantity, 2);
    }
}
