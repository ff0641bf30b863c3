//! Per-pool, per-epoch leader schedules.

use sqlx::{Row, sqlite::SqlitePool};

use crate::StoreError;

/// The leader schedule of one pool for one epoch. Append-only: once a
/// row exists for a (pool, epoch) pair it is never rewritten, and its
/// presence doubles as the "already refreshed" signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Bech32 pool id.
    pub pool_id: String,
    /// Epoch the schedule applies to.
    pub epoch: u64,
    /// Assigned leader slots, ascending.
    pub slots: Vec<u64>,
    /// Expected-block count. May exceed `slots.len()`; it feeds the
    /// expected-blocks metric, not the slot membership checks.
    pub quantity: u64,
    /// Fingerprint of the inputs used to compute the schedule.
    pub hash: String,
}

/// Store for leader schedules.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    /// Create a store over `pool`.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist the schedule for (`pool_id`, `epoch`). Callers guard
    /// against double insertion with [`ScheduleStore::exists`].
    pub async fn put(
        &self,
        pool_id: &str,
        epoch: u64,
        slots: &[u64],
        quantity: u64,
        hash: &str,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(slots)?;
        sqlx::query(
            "INSERT INTO schedules (pool_id, epoch, slots, slot_qty, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(pool_id)
        .bind(epoch as i64)
        .bind(encoded)
        .bind(quantity as i64)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the schedule for (`pool_id`, `epoch`).
    pub async fn get(&self, pool_id: &str, epoch: u64) -> Result<Schedule, StoreError> {
        let row = sqlx::query(
            "SELECT slots, slot_qty, hash FROM schedules WHERE pool_id = ? AND epoch = ?",
        )
        .bind(pool_id)
        .bind(epoch as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        let raw: String = row.get("slots");
        let slots: Vec<u64> = serde_json::from_str(&raw)?;
        let quantity: i64 = row.get("slot_qty");
        Ok(Schedule {
            pool_id: pool_id.to_owned(),
            epoch,
            slots,
            quantity: quantity as u64,
            hash: row.get("hash"),
        })
    }

    /// Whether a schedule exists for (`pool_id`, `epoch`). Used as the
    /// at-most-once guard against recomputation.
    pub async fn exists(&self, pool_id: &str, epoch: u64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM schedules WHERE pool_id = ? AND epoch = ?")
            .bind(pool_id)
            .bind(epoch as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Whether `pool_id` leads `slot` in `epoch`. A missing schedule is
    /// not an error here: "no record yet" and "empty schedule" both mean
    /// "not a leader for this slot" to the scan loop.
    pub async fn is_leader(
        &self,
        pool_id: &str,
        slot: u64,
        epoch: u64,
    ) -> Result<bool, StoreError> {
        match self.get(pool_id, epoch).await {
            Ok(schedule) => Ok(schedule.slots.contains(&slot)),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Whether the schedule for (`pool_id`, `epoch`) is empty, either by
    /// slot set or by quantity. Unlike [`ScheduleStore::is_leader`] a
    /// missing record is an error.
    pub async fn is_empty(&self, pool_id: &str, epoch: u64) -> Result<bool, StoreError> {
        let schedule = self.get(pool_id, epoch).await?;
        Ok(schedule.slots.is_empty() || schedule.quantity == 0)
    }

    /// First assigned slot strictly greater than `height`, or `0` if the
    /// schedule has no such entry. Slot 0 never occurs in practice, so 0
    /// serves as the "none" sentinel. Relies on the slot list being
    /// sorted ascending.
    pub async fn next_slot_after(
        &self,
        pool_id: &str,
        height: u64,
        epoch: u64,
    ) -> Result<u64, StoreError> {
        let schedule = self.get(pool_id, epoch).await?;
        for slot in schedule.slots {
            if slot > height {
                return Ok(slot);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect_in_memory;

    async fn store_with(slots: &[u64], quantity: u64) -> ScheduleStore {
        let store = ScheduleStore::new(connect_in_memory().await.unwrap());
        store.put("pool1abc", 450, slots, quantity, "nonce123").await.unwrap();
        store
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = store_with(&[1000, 2000, 3000], 3).await;
        let schedule = store.get("pool1abc", 450).await.unwrap();
        assert_eq!(schedule.slots, vec![1000, 2000, 3000]);
        assert_eq!(schedule.quantity, 3);
        assert_eq!(schedule.hash, "nonce123");
    }

    #[tokio::test]
    async fn get_missing_record_is_not_found() {
        let store = ScheduleStore::new(connect_in_memory().await.unwrap());
        assert!(matches!(store.get("pool1abc", 450).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn exists_distinguishes_present_from_absent() {
        let store = store_with(&[], 0).await;
        assert!(store.exists("pool1abc", 450).await.unwrap());
        assert!(!store.exists("pool1abc", 451).await.unwrap());
        assert!(!store.exists("pool1zzz", 450).await.unwrap());
    }

    #[tokio::test]
    async fn is_leader_matches_slot_membership() {
        let store = store_with(&[1000, 2000], 2).await;
        assert!(store.is_leader("pool1abc", 1000, 450).await.unwrap());
        assert!(store.is_leader("pool1abc", 2000, 450).await.unwrap());
        assert!(!store.is_leader("pool1abc", 1500, 450).await.unwrap());
    }

    #[tokio::test]
    async fn is_leader_is_false_for_missing_record() {
        let store = ScheduleStore::new(connect_in_memory().await.unwrap());
        assert!(!store.is_leader("pool1abc", 1000, 450).await.unwrap());
    }

    #[tokio::test]
    async fn is_empty_checks_slots_and_quantity() {
        let store = store_with(&[], 0).await;
        assert!(store.is_empty("pool1abc", 450).await.unwrap());

        let store = store_with(&[1000], 1).await;
        assert!(!store.is_empty("pool1abc", 450).await.unwrap());

        // Zero quantity trumps a non-empty slot list.
        let store = store_with(&[1000], 0).await;
        assert!(store.is_empty("pool1abc", 450).await.unwrap());
    }

    #[tokio::test]
    async fn is_empty_fails_on_missing_record() {
        let store = ScheduleStore::new(connect_in_memory().await.unwrap());
        assert!(matches!(store.is_empty("pool1abc", 450).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn next_slot_after_returns_smallest_greater_slot() {
        let store = store_with(&[1000, 2000], 2).await;
        assert_eq!(store.next_slot_after("pool1abc", 100, 450).await.unwrap(), 1000);
        assert_eq!(store.next_slot_after("pool1abc", 1500, 450).await.unwrap(), 2000);
        assert_eq!(store.next_slot_after("pool1abc", 5000, 450).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn next_slot_after_empty_schedule_is_sentinel_zero() {
        let store = store_with(&[], 0).await;
        assert_eq!(store.next_slot_after("pool1abc", 100, 450).await.unwrap(), 0);
    }
}
