//! Singleton scan-progress cursor.

use chrono::{DateTime, Utc};
use sqlx::{Row, sqlite::SqlitePool};

use crate::StoreError;

/// The persisted scan cursor: the last slot of `epoch` that the block
/// watcher fully processed. Exactly one row exists at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Epoch currently being scanned.
    pub epoch: u64,
    /// Last slot fully processed.
    pub slot: u64,
    /// Time of the last save.
    pub last_update: DateTime<Utc>,
}

/// Store for the singleton progress row.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    pool: SqlitePool,
}

impl ProgressStore {
    /// Create a store over `pool`.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read the cursor. `Ok(None)` means no row has ever been saved,
    /// which is a normal first-run condition, not an error.
    pub async fn load(&self) -> Result<Option<Progress>, StoreError> {
        let row = sqlx::query("SELECT epoch, slot, last_update FROM watcher_progress WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let epoch: i64 = row.get("epoch");
        let slot: i64 = row.get("slot");
        let last_update: DateTime<Utc> = row.get("last_update");
        Ok(Some(Progress { epoch: epoch as u64, slot: slot as u64, last_update }))
    }

    /// Upsert the cursor with a fresh timestamp.
    pub async fn save(&self, epoch: u64, slot: u64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO watcher_progress (id, epoch, slot, last_update) VALUES (1, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET epoch = excluded.epoch, slot = excluded.slot,
                 last_update = excluded.last_update",
        )
        .bind(epoch as i64)
        .bind(slot as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
