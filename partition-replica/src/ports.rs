//! Abstract capabilities for every collaborator spec §1 calls out as
//! "referenced only by interface": the catalog/schema registry, the
//! placement driver, the RAFT client, the row storage engine, the lock
//! manager, and the tuple/index codec.
//!
//! `PartitionReplicaListener` holds each of these as `Arc<dyn Trait>`
//! rather than a concrete type, the same way the reference crate's
//! `EmbeddedDBStateMachine` implements `raft::StateMachine` and is held by
//! `raft::Node<()>` through a trait object — the coordinator and its
//! collaborators are decoupled at a trait boundary instead of a direct
//! struct dependency (§9 "Cyclic references ... inject as abstract
//! capabilities").

use std::ops::Bound;
use std::sync::Arc;

use common::bytes::Bytes;

use crate::error::Result;
use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};
use crate::locks::{LockKey, LockMode};
use crate::mvcc::ReadResult;
use crate::replication::commands::ReplicatedCommand;

/// The placement driver: tells us who currently holds the primary lease for
/// a replication group (§4.1).
#[async_trait::async_trait]
pub trait PlacementDriverClient: Send + Sync {
    async fn current_lease(&self, group_id: ReplicationGroupId, now: HybridTimestamp) -> Result<PrimaryLease>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryLease {
    pub leaseholder: String,
    /// The enlistment consistency token: the lease's start time.
    pub start_time: u64,
    pub expiration_time: u64,
}

impl PrimaryLease {
    pub fn covers(&self, now: HybridTimestamp) -> bool {
        self.expiration_time > now.physical
    }
}

/// The catalog/schema registry: table existence and schema version
/// at-a-timestamp (§4.2), plus the forward/backward compatibility checks
/// used at commit (§4.5 step 1) and during RW batch validation (§4.3).
#[async_trait::async_trait]
pub trait CatalogService: Send + Sync {
    /// `None` if the table does not exist at `timestamp`.
    async fn schema_version_at(
        &self,
        group_id: ReplicationGroupId,
        timestamp: HybridTimestamp,
    ) -> Result<Option<u64>>;

    /// The catalog version that is guaranteed to be visible to every replica
    /// as of `timestamp` (used to stamp replicated commands, §4.4 step 3).
    async fn reliable_catalog_version_at(&self, timestamp: HybridTimestamp) -> Result<u64>;

    /// `true` if `new_version`'s schema can read rows written under
    /// `old_version`'s schema (used validating RW batch results, §4.3).
    async fn is_backward_compatible(
        &self,
        group_id: ReplicationGroupId,
        old_version: u64,
        new_version: u64,
    ) -> Result<bool>;

    /// `true` if `new_version`'s schema is forward-compatible with
    /// `old_version` (used at commit-time validation, §4.5 step 1).
    async fn is_forward_compatible(
        &self,
        group_id: ReplicationGroupId,
        old_version: u64,
        new_version: u64,
    ) -> Result<bool>;

    /// Blocks until this replica's local metadata cache has observed every
    /// catalog update up to `timestamp` (§4.2 step 3).
    async fn wait_for_metadata_completeness(&self, timestamp: HybridTimestamp) -> Result<()>;
}

/// The RAFT client: submits replicated commands and reports the pending
/// execution's eventual outcome (§4.4 step 5, §4.9).
#[async_trait::async_trait]
pub trait ReplicationClient: Send + Sync {
    async fn submit(&self, command: ReplicatedCommand) -> Result<PendingReplication>;
}

/// A handle to a command that has been submitted but may not yet be
/// committed/applied.
#[async_trait::async_trait]
pub trait PendingReplicationHandle: Send + Sync {
    async fn wait_applied(&self) -> Result<HybridTimestamp>;
}

pub struct PendingReplication(pub Arc<dyn PendingReplicationHandle>);

/// The row storage engine: MVCC reads/writes of opaque row bytes (§1, §3
/// "Read Result").
#[async_trait::async_trait]
pub trait RowStorageEngine: Send + Sync {
    /// Resolves candidate rows for `row_id` at `read_timestamp`. Per §3, a
    /// row slot holds at most one write intent; this can return at most one
    /// regular (committed) entry plus, if present, one write-intent entry.
    async fn read(&self, row_id: RowId, read_timestamp: HybridTimestamp) -> Result<Vec<ReadResult>>;

    async fn read_for_tx(&self, row_id: RowId, tx_id: TransactionId) -> Result<Vec<ReadResult>>;

    /// Full-partition / range scan, returning `(key, row_id)` pairs in key
    /// order; the key is what a [`crate::txn::cursor::ScanCursor`] resumes
    /// after once a batch is exhausted.
    async fn scan_row_ids(
        &self,
        lower: Bound<Bytes>,
        upper: Bound<Bytes>,
        limit: usize,
    ) -> Result<Vec<(Bytes, RowId)>>;

    /// Applies a write intent for `tx_id` on `row_id`, the local-replica
    /// side effect of an `UpdateCommand`/`UpdateAllCommand` apply (§4.4
    /// step 6 "Local apply fast path"). `value = None` writes a tombstone
    /// intent (a pending delete).
    async fn write_intent(&self, tx_id: TransactionId, row_id: RowId, value: Option<Bytes>, schema_version: u64) -> Result<()>;

    /// Switches a write intent on `row_id` belonging to `tx_id` to its final
    /// outcome, applied locally (not through replication) as part of async
    /// cleanup (§4.8) or the write-intent switch fast path (§4.6).
    async fn switch_write_intent(
        &self,
        row_id: RowId,
        tx_id: TransactionId,
        commit: bool,
        commit_timestamp: Option<HybridTimestamp>,
    ) -> Result<()>;
}

/// The lock manager: grants/releases locks by key and mode (§1, §5). The
/// coordinator's `LockTableClient`/`IndexLocker` are thin, typed wrappers
/// around this trait (§2 component table).
#[async_trait::async_trait]
pub trait LockManagerClient: Send + Sync {
    async fn acquire(&self, tx_id: TransactionId, key: LockKey, mode: LockMode) -> Result<()>;

    async fn release(&self, tx_id: TransactionId, key: LockKey) -> Result<()>;

    /// Releases every lock held by `tx_id`, regardless of key (used at
    /// transaction finish / 1PC completion, §4.4, §4.5).
    async fn release_all(&self, tx_id: TransactionId) -> Result<()>;
}

/// The tuple/index codec: projects PK and index-key bytes out of an opaque
/// row. Out of scope to implement (it's the wire/storage format); the
/// coordinator only calls through this trait.
pub trait TupleCodec: Send + Sync {
    fn primary_key_bytes(&self, row: &[u8]) -> Result<Bytes>;

    fn index_key_bytes(&self, row: &[u8], index_id: u32) -> Result<Bytes>;
}

/// The cluster membership roster: used to detect that a write intent's
/// producing transaction's coordinator node has left the cluster, which
/// triggers implicit orphan recovery on the next reader that hits the
/// intent (§4.7 "or implicitly when resolving a write intent whose
/// coordinator has disappeared from the cluster roster").
#[async_trait::async_trait]
pub trait ClusterRosterClient: Send + Sync {
    async fn is_member(&self, node_id: &str) -> Result<bool>;
}

/// Durable `Tx Meta` storage (§3), persisted only on the commit partition.
/// Backs the finish protocol (§4.5), orphan recovery (§4.7), and the
/// primary-elected cleanup scan (§4.7 "scan Tx State Storage for finalized
/// transactions with locksReleased=false").
#[async_trait::async_trait]
pub trait TxStateStorage: Send + Sync {
    async fn read(&self, tx_id: TransactionId) -> Result<Option<crate::txn::state::DurableTxMeta>>;

    async fn write(&self, meta: crate::txn::state::DurableTxMeta) -> Result<()>;

    async fn mark_locks_released(&self, tx_id: TransactionId) -> Result<()>;

    /// Every finalized (committed/aborted) transaction this storage knows
    /// about whose locks are not yet released, scanned on `PrimaryElected`
    /// (§4.7).
    async fn scan_pending_cleanup(&self) -> Result<Vec<crate::txn::state::DurableTxMeta>>;
}
