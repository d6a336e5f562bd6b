//! The replicated command catalog (§4.4–§4.7): everything that must be
//! agreed on by the replication group rather than applied unilaterally by
//! the primary.
//!
//! Per §6 "Each carries safeTime and requiredCatalogVersion" and §5's list
//! of safe-time-bearing commands (Update, UpdateAll, Finish,
//! WriteIntentSwitch, SafeTimeSync, MarkLocksReleased — `BuildIndexCommand`
//! is the one command kind that does not carry a safe time), every other
//! command stamps a [`HybridTimestamp`] assigned under the per-group
//! linearization mutex just before submission (§4.4 step 5, §4.9).

use common::bytes::Bytes;

use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};

#[derive(Debug, Clone)]
pub enum ReplicatedCommand {
    Update(UpdateCommand),
    UpdateAll(UpdateAllCommand),
    FinishTx(FinishTxCommand),
    WriteIntentSwitch(WriteIntentSwitchCommand),
    MarkLocksReleased(MarkLocksReleasedCommand),
    BuildIndex(BuildIndexCommand),
    SafeTimeSync(SafeTimeSyncCommand),
}

impl ReplicatedCommand {
    /// `None` only for `BuildIndex`, the one command kind the spec does not
    /// list as safe-time-bearing.
    pub fn safe_time(&self) -> Option<HybridTimestamp> {
        match self {
            ReplicatedCommand::Update(c) => Some(c.safe_time),
            ReplicatedCommand::UpdateAll(c) => Some(c.safe_time),
            ReplicatedCommand::FinishTx(c) => Some(c.safe_time),
            ReplicatedCommand::WriteIntentSwitch(c) => Some(c.safe_time),
            ReplicatedCommand::MarkLocksReleased(c) => Some(c.safe_time),
            ReplicatedCommand::BuildIndex(_) => None,
            ReplicatedCommand::SafeTimeSync(c) => Some(c.safe_time),
        }
    }

    /// Returns a clone of this command restamped with a fresh safe time,
    /// used by the dispatcher's safe-time-reorder retry loop (§4.4 step 5
    /// "cloning the command with a fresh safeTime and retrying"). A no-op
    /// for `BuildIndex`, which carries no safe time to restamp.
    pub fn restamped(&self, fresh: HybridTimestamp) -> ReplicatedCommand {
        match self {
            ReplicatedCommand::Update(c) => ReplicatedCommand::Update(UpdateCommand {
                safe_time: fresh,
                ..c.clone()
            }),
            ReplicatedCommand::UpdateAll(c) => ReplicatedCommand::UpdateAll(UpdateAllCommand {
                safe_time: fresh,
                ..c.clone()
            }),
            ReplicatedCommand::FinishTx(c) => ReplicatedCommand::FinishTx(FinishTxCommand {
                safe_time: fresh,
                ..c.clone()
            }),
            ReplicatedCommand::WriteIntentSwitch(c) => ReplicatedCommand::WriteIntentSwitch(WriteIntentSwitchCommand {
                safe_time: fresh,
                ..c.clone()
            }),
            ReplicatedCommand::MarkLocksReleased(c) => ReplicatedCommand::MarkLocksReleased(MarkLocksReleasedCommand {
                safe_time: fresh,
                ..c.clone()
            }),
            ReplicatedCommand::BuildIndex(c) => ReplicatedCommand::BuildIndex(c.clone()),
            ReplicatedCommand::SafeTimeSync(_) => ReplicatedCommand::SafeTimeSync(SafeTimeSyncCommand { safe_time: fresh }),
        }
    }

    /// Whether this command's local apply may run ahead of full
    /// replication (§4.4 step 6 "Local apply fast path"). `full=true`
    /// (1PC) update commands must wait for the full round trip before
    /// acknowledging (§4.4 "1PC transactions"); every other command kind
    /// behaves as if full (no partial-apply fast path is defined for it).
    pub fn is_full(&self) -> bool {
        match self {
            ReplicatedCommand::Update(c) => c.full,
            ReplicatedCommand::UpdateAll(c) => c.full,
            _ => true,
        }
    }
}

/// A single-row write intent, applied under the row's write lock (§4.4
/// step 3 "Replicate the single-row UpdateCommand").
#[derive(Debug, Clone)]
pub struct UpdateCommand {
    pub safe_time: HybridTimestamp,
    pub required_catalog_version: u64,
    pub tx_id: TransactionId,
    pub row_id: RowId,
    /// `None` removes the row (writes a tombstone intent).
    pub value: Option<Bytes>,
    /// `(index_id, key_bytes, is_insert)` for every secondary index touched.
    pub index_mutations: Vec<(u32, Bytes, bool)>,
    pub schema_version: u64,
    /// Newest prior commit time of this row, if known, threaded through so
    /// a later reader can start its `newestCommitTimestamp` walk without a
    /// wasted round trip (§6 "per-row timestamp hints").
    pub newest_commit_timestamp: Option<HybridTimestamp>,
    /// `true` for an implicit (1PC) transaction's sole command (§4.4
    /// "1PC (implicit) transactions set full=true").
    pub full: bool,
}

/// A batch write intent covering every row of a multi-row mutation,
/// replicated as a single command so the batch is applied atomically on
/// every replica (§4.4 step 3 "Replicate the batched UpdateAllCommand").
#[derive(Debug, Clone)]
pub struct UpdateAllCommand {
    pub safe_time: HybridTimestamp,
    pub required_catalog_version: u64,
    pub tx_id: TransactionId,
    pub rows: Vec<RowMutation>,
    pub schema_version: u64,
    pub full: bool,
}

#[derive(Debug, Clone)]
pub struct RowMutation {
    pub row_id: RowId,
    pub value: Option<Bytes>,
    pub index_mutations: Vec<(u32, Bytes, bool)>,
    pub newest_commit_timestamp: Option<HybridTimestamp>,
}

/// Commits or aborts a transaction's write intents on this partition
/// (§4.5 "FinishTxCommand(txId, commit, commitTimestamp, catalogVersion,
/// enlistedTablePartitionIds)").
#[derive(Debug, Clone)]
pub struct FinishTxCommand {
    pub safe_time: HybridTimestamp,
    pub tx_id: TransactionId,
    pub commit: bool,
    pub commit_timestamp: Option<HybridTimestamp>,
    pub catalog_version: u64,
    pub enlisted_table_partition_ids: Vec<ReplicationGroupId>,
}

/// Switches a single already-replicated write intent to its final outcome,
/// used by the fast-path cleanup when a reader discovers a resolved intent
/// before the owning transaction's `FinishTxCommand` reaches this partition
/// (§4.6, §4.8).
#[derive(Debug, Clone)]
pub struct WriteIntentSwitchCommand {
    pub safe_time: HybridTimestamp,
    pub required_catalog_version: u64,
    pub tx_id: TransactionId,
    pub row_id: RowId,
    pub commit: bool,
    pub commit_timestamp: Option<HybridTimestamp>,
}

/// Durably records that every lock held by `tx_id` on this partition has
/// been released, letting the transaction's durable metadata be garbage
/// collected (§4.5 step 6).
#[derive(Debug, Clone)]
pub struct MarkLocksReleasedCommand {
    pub safe_time: HybridTimestamp,
    pub tx_id: TransactionId,
    pub group_id: ReplicationGroupId,
}

/// Registers a newly built secondary index's initial row set (§4.2, schema
/// evolution — out of deep scope but its replication shape is needed by the
/// command catalog). Carries no safe time: index builds are idempotent
/// catch-up work, not ordered writes.
#[derive(Debug, Clone)]
pub struct BuildIndexCommand {
    pub index_id: u32,
    pub row_ids: Vec<RowId>,
}

/// Advances the partition's safe-time watermark in the absence of other
/// write traffic (§4.9 "periodic SafeTimeSyncCommand").
#[derive(Debug, Clone)]
pub struct SafeTimeSyncCommand {
    pub safe_time: HybridTimestamp,
}
