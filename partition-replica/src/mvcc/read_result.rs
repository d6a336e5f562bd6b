use common::bytes::Bytes;

use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};

/// A single candidate version of a row, as returned by the storage engine
/// (§3 "Read Result"). A row slot holds at most one committed entry and at
/// most one write intent; the resolver (`mvcc::resolver`) is handed both
/// when they coexist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub row_id: RowId,
    /// `None` for a tombstone (the row was deleted as of this version).
    pub value: Option<Bytes>,
    /// Set only for a write intent: the transaction that wrote it.
    pub tx_id: Option<TransactionId>,
    /// Set only for the committed entry; `None` for a pending write intent.
    pub commit_timestamp: Option<HybridTimestamp>,
    /// For a write intent, the commit timestamp of the newest *other*
    /// committed version of this key, if storage already knows one. Used to
    /// walk backwards to an older readable value without a second round
    /// trip when the intent's own transaction resolves to committed but
    /// too new for the reader's timestamp (§4.3, §4.8 "walk each write
    /// intent's newestCommitTimestamp").
    pub newest_commit_timestamp: Option<HybridTimestamp>,
    /// The transaction's commit partition, carried on a write intent so a
    /// reader can resolve its state without a catalog lookup.
    pub commit_table_id: Option<u32>,
    pub commit_partition_id: Option<u32>,
    /// The schema version this version's bytes were written under, checked
    /// against a reading transaction's begin schema during RW batch
    /// validation (§4.3 "validate backwards-compatibility of each row's
    /// schema vs. the tx's begin schema").
    pub schema_version: u64,
}

impl ReadResult {
    pub fn is_write_intent(&self) -> bool {
        self.tx_id.is_some()
    }

    pub fn is_visible_at(&self, read_timestamp: HybridTimestamp) -> bool {
        match self.commit_timestamp {
            Some(ts) => ts <= read_timestamp,
            None => false,
        }
    }

    pub fn commit_partition(&self) -> Option<ReplicationGroupId> {
        match (self.commit_table_id, self.commit_partition_id) {
            (Some(t), Some(p)) => Some(ReplicationGroupId::new(t, p)),
            _ => None,
        }
    }
}
