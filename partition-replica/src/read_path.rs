//! Read Path (spec §4.3): read-only point-get/scan, and the locking
//! read-write get/scan that a write later builds on.

use std::ops::Bound;
use std::sync::Arc;

use common::bytes::Bytes;

use crate::clock::SafeTimeTracker;
use crate::error::Result;
use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};
use crate::locks::{IndexLocker, IndexRow, LockMode, LockTableClient};
use crate::mvcc::MvccReadResolver;
use crate::ports::RowStorageEngine;
use crate::schema::SchemaValidator;
use crate::txn::cursor::ScanCursor;

/// One row a read returned, paired with the schema version its bytes were
/// written under so the caller can validate it against a transaction's
/// begin schema (§4.3 "validate backwards-compatibility of each row's
/// schema").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRow {
    pub key: Bytes,
    pub row_id: RowId,
    pub value: Option<Bytes>,
    pub schema_version: u64,
}

pub struct ReadPath {
    group_id: ReplicationGroupId,
    storage: Arc<dyn RowStorageEngine>,
    resolver: Arc<MvccReadResolver>,
    safe_time: Arc<SafeTimeTracker>,
    lock_table: LockTableClient,
    index_locker: Arc<IndexLocker>,
}

impl ReadPath {
    pub fn new(
        group_id: ReplicationGroupId,
        storage: Arc<dyn RowStorageEngine>,
        resolver: Arc<MvccReadResolver>,
        safe_time: Arc<SafeTimeTracker>,
        lock_table: LockTableClient,
        index_locker: Arc<IndexLocker>,
    ) -> Self {
        Self {
            group_id,
            storage,
            resolver,
            safe_time,
            lock_table,
            index_locker,
        }
    }

    /// §4.3 "RO point-get by PK": a primary, on a request it knows is fresh
    /// enough, may skip the safe-time wait and read straight through.
    pub async fn ro_get(&self, key: Bytes, read_timestamp: HybridTimestamp, is_primary: bool, now: HybridTimestamp) -> Result<Option<Bytes>> {
        if !(is_primary && now > read_timestamp) {
            self.safe_time.wait_until(read_timestamp).await;
        }

        let row_id = match self.lookup_row_id(&key).await? {
            Some(id) => id,
            None => return Ok(None),
        };

        let candidates = self.storage.read(row_id, read_timestamp).await?;
        self.resolver.resolve(row_id, candidates, read_timestamp, None).await
    }

    /// §4.3 "RO scan": advances `cursor` by one batch, resolving each row.
    /// Does not mutate the cursor in place — callers persist the returned
    /// cursor (e.g. via [`crate::txn::cursor_registry::CursorRegistry`]).
    pub async fn ro_scan(&self, mut cursor: ScanCursor, read_timestamp: HybridTimestamp, is_primary: bool, now: HybridTimestamp) -> Result<(Vec<ReadRow>, ScanCursor)> {
        if !(is_primary && now > read_timestamp) {
            self.safe_time.wait_until(read_timestamp).await;
        }

        let batch = self.storage.scan_row_ids(cursor.lower(), cursor.upper(), cursor.batch_size()).await?;
        let exhausted_by_short_batch = batch.len() < cursor.batch_size();

        let mut rows = Vec::with_capacity(batch.len());
        let mut last_key = None;

        for (key, row_id) in batch {
            let candidates = self.storage.read(row_id, read_timestamp).await?;
            if let Some((value, schema_version)) = self.resolver.resolve_versioned(row_id, candidates, read_timestamp, None).await? {
                rows.push(ReadRow {
                    key: key.clone(),
                    row_id,
                    value,
                    schema_version,
                });
            }
            last_key = Some(key);
        }

        match last_key {
            Some(key) if !exhausted_by_short_batch => cursor.resume_after(key),
            _ => cursor.mark_exhausted(),
        }

        Ok((rows, cursor))
    }

    /// §4.3 "RW get": table `IS`, row `S`, then resolve with read-your-own-
    /// writes against `tx_id`'s own pending intent.
    pub async fn rw_get(&self, tx_id: TransactionId, key: Bytes) -> Result<Option<ReadRow>> {
        self.lock_table.lock_table(tx_id, self.group_id, LockMode::IS).await?;

        let row_id = match self.lookup_row_id(&key).await? {
            Some(id) => id,
            None => return Ok(None),
        };

        self.lock_table.lock_row(tx_id, self.group_id, row_id, LockMode::S).await?;

        let candidates = self.storage.read_for_tx(row_id, tx_id).await?;
        let read_timestamp = tx_id.begin_timestamp();
        let resolved = self.resolver.resolve_versioned(row_id, candidates, read_timestamp, Some(tx_id)).await?;

        Ok(resolved.map(|(value, schema_version)| ReadRow {
            key,
            row_id,
            value,
            schema_version,
        }))
    }

    /// §4.3 "RW scan": range-locks each row as it's emitted (checking the
    /// cursor's upper bound only after the lock is granted, so phantoms at
    /// the range edge are prevented) and resolves with read-your-own-writes.
    pub async fn rw_scan(&self, tx_id: TransactionId, index_id: u32, mut cursor: ScanCursor) -> Result<(Vec<ReadRow>, ScanCursor)> {
        self.lock_table.lock_table(tx_id, self.group_id, LockMode::IS).await?;

        let batch = self.storage.scan_row_ids(cursor.lower(), cursor.upper(), cursor.batch_size()).await?;
        let exhausted_by_short_batch = batch.len() < cursor.batch_size();

        let mut rows = Vec::with_capacity(batch.len());
        let mut last_key = None;
        let read_timestamp = tx_id.begin_timestamp();

        for (key, row_id) in batch {
            self.index_locker
                .locks_for_scan(tx_id, index_id, &IndexRow { key: key.clone(), row_id })
                .await?;

            if cursor.past_upper_bound(&key) {
                break;
            }

            self.lock_table.lock_row(tx_id, self.group_id, row_id, LockMode::S).await?;

            let candidates = self.storage.read_for_tx(row_id, tx_id).await?;
            if let Some((value, schema_version)) = self.resolver.resolve_versioned(row_id, candidates, read_timestamp, Some(tx_id)).await? {
                rows.push(ReadRow {
                    key: key.clone(),
                    row_id,
                    value,
                    schema_version,
                });
            }
            last_key = Some(key);
        }

        match last_key {
            Some(key) if !exhausted_by_short_batch => cursor.resume_after(key),
            _ => cursor.mark_exhausted(),
        }

        Ok((rows, cursor))
    }

    /// Validates every row an RW batch returned against the transaction's
    /// begin schema version (§4.3).
    pub async fn validate_batch_schema(&self, validator: &SchemaValidator, tx_begin_schema_version: u64, rows: &[ReadRow]) -> Result<()> {
        for row in rows {
            validator.validate_backward_compatible(tx_begin_schema_version, row.schema_version).await?;
        }
        Ok(())
    }

    async fn lookup_row_id(&self, key: &Bytes) -> Result<Option<RowId>> {
        let hits = self.storage.scan_row_ids(Bound::Included(key.clone()), Bound::Included(key.clone()), 1).await?;
        Ok(hits.into_iter().next().map(|(_, row_id)| row_id))
    }
}
