//! Index Locker component (spec §2, §4.3 "sorted index: range-lock", "hash
//! index: IS on index, S on (index, keyBytes)").

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use common::bytes::Bytes;

use crate::error::Result;
use crate::ids::{ReplicationGroupId, RowId, TransactionId};
use crate::locks::key_ranges::KeyRanges;
use crate::locks::{LockKey, LockMode};
use crate::ports::LockManagerClient;

/// A row surfaced by a sorted or hash index lookup: its encoded index key
/// plus the row id it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub key: Bytes,
    pub row_id: RowId,
}

/// A lock acquired only for the duration of applying a single write
/// command, released as soon as the local apply finishes rather than at
/// transaction end (§4.4 step 2, §5 "Short-term locks").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortTermLock {
    pub key: LockKey,
}

pub struct IndexLocker {
    manager: Arc<dyn LockManagerClient>,
    /// Tracks which parts of each `(tx_id, index_id)` sorted-index keyspace
    /// are already range-locked, so that re-scanning the same range across
    /// scan batches doesn't re-acquire (and double count) the same lock.
    scanned_ranges: StdMutex<HashMap<(TransactionId, u32), KeyRanges<bool>>>,
}

impl IndexLocker {
    pub fn new(manager: Arc<dyn LockManagerClient>) -> Self {
        Self {
            manager,
            scanned_ranges: StdMutex::new(HashMap::new()),
        }
    }

    /// Grants an S lock on the next row emitted by a sorted-index scan
    /// cursor. Callers must check the scan's upper bound *after* this
    /// returns, not before, so that a row exactly at (or just past) the
    /// range edge is still locked before being excluded — otherwise a
    /// concurrent insert into the just-excluded gap would not conflict with
    /// this transaction (§4.3 "Upper-bound is checked after the lock is
    /// granted to prevent phantom reads at the range edge").
    pub async fn locks_for_scan(
        &self,
        tx_id: TransactionId,
        index_id: u32,
        row: &IndexRow,
    ) -> Result<()> {
        let already_locked = {
            let mut guard = self.scanned_ranges.lock().unwrap();
            let ranges = guard.entry((tx_id, index_id)).or_insert_with(KeyRanges::new);
            let mut locked = false;
            let upper = next_key(&row.key);
            ranges.range(row.key.clone(), upper, |v| {
                locked = *v;
                *v = true;
                true
            });
            locked
        };

        if already_locked {
            return Ok(());
        }

        self.manager
            .acquire(tx_id, LockKey::IndexKey(index_id, row.key.clone()), LockMode::S)
            .await
    }

    /// `IS` on the index, `S` on `(index, keyBytes)`, then `S` on each
    /// resolved `(table, rowId)` (§4.3 "hash index").
    pub async fn locks_for_hash_lookup(
        &self,
        tx_id: TransactionId,
        group_id: ReplicationGroupId,
        index_id: u32,
        key: Bytes,
        rows: &[RowId],
    ) -> Result<()> {
        self.manager
            .acquire(tx_id, LockKey::Index(index_id), LockMode::IS)
            .await?;
        self.manager
            .acquire(tx_id, LockKey::IndexKey(index_id, key), LockMode::S)
            .await?;
        for row_id in rows {
            self.manager
                .acquire(tx_id, LockKey::Row(group_id, *row_id), LockMode::S)
                .await?;
        }
        Ok(())
    }

    /// The lookup-by-key lock taken before resolving a write by primary key
    /// (§4.4 step 1 "Resolve by PK: take the PK lookup lock").
    pub async fn locks_for_lookup_by_key(
        &self,
        tx_id: TransactionId,
        pk_index_id: u32,
        key: Bytes,
    ) -> Result<ShortTermLock> {
        let lock_key = LockKey::IndexKey(pk_index_id, key);
        self.manager.acquire(tx_id, lock_key.clone(), LockMode::S).await?;
        Ok(ShortTermLock { key: lock_key })
    }

    /// Short-term locks taken on every secondary index when inserting a new
    /// row (§4.4 step 2).
    pub async fn locks_for_insert(
        &self,
        tx_id: TransactionId,
        index_ids: &[u32],
        row: &IndexRow,
    ) -> Result<Vec<ShortTermLock>> {
        self.locks_for_index_mutation(tx_id, index_ids, row).await
    }

    /// Short-term locks taken on every secondary index when removing a row
    /// (§4.4 step 2).
    pub async fn locks_for_remove(
        &self,
        tx_id: TransactionId,
        index_ids: &[u32],
        row: &IndexRow,
    ) -> Result<Vec<ShortTermLock>> {
        self.locks_for_index_mutation(tx_id, index_ids, row).await
    }

    async fn locks_for_index_mutation(
        &self,
        tx_id: TransactionId,
        index_ids: &[u32],
        row: &IndexRow,
    ) -> Result<Vec<ShortTermLock>> {
        let mut locks = Vec::with_capacity(index_ids.len());
        for index_id in index_ids {
            let lock_key = LockKey::IndexKey(*index_id, row.key.clone());
            self.manager.acquire(tx_id, lock_key.clone(), LockMode::X).await?;
            locks.push(ShortTermLock { key: lock_key });
        }
        Ok(locks)
    }

    /// Releases short-term locks as soon as the local apply finishes
    /// (§4.4 step 6, §5).
    pub async fn release_short_term_locks(
        &self,
        tx_id: TransactionId,
        locks: Vec<ShortTermLock>,
    ) -> Result<()> {
        for lock in locks {
            self.manager.release(tx_id, lock.key).await?;
        }
        Ok(())
    }

    /// Drops bookkeeping for a transaction's scan ranges once its cursors
    /// are closed or it finishes (§4.6 step 1).
    pub fn forget_transaction(&self, tx_id: TransactionId) {
        self.scanned_ranges
            .lock()
            .unwrap()
            .retain(|(tx, _), _| *tx != tx_id);
    }
}

/// Smallest byte string strictly greater than `key`, used as the exclusive
/// upper bound of the single-key range we mark as locked in
/// `scanned_ranges`.
fn next_key(key: &Bytes) -> Bytes {
    let mut v = key.to_vec();
    v.push(0);
    Bytes::from(v)
}
