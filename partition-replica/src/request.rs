//! Request model (spec §6 "External Interfaces"): one variant per
//! dispatch-discriminator, each carrying only the fields that kind needs.

use common::bytes::Bytes;
use std::ops::Bound;

use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};
use crate::write_path::WriteKind;

/// Fields common to every `PrimaryReplicaRequest` (§4.1).
#[derive(Debug, Clone)]
pub struct PrimaryEnvelope {
    pub tx_id: TransactionId,
    pub commit_partition_id: ReplicationGroupId,
    pub enlistment_consistency_token: u64,
    pub schema_version: Option<u64>,
    /// `true` for an implicit (1PC) transaction's sole command (§4.4).
    pub full: bool,
}

/// Scan parameters shared by `RW_SCAN`/`RO_SCAN` (§6).
#[derive(Debug, Clone)]
pub struct ScanSpec {
    pub scan_id: u64,
    pub batch_size: Option<usize>,
    pub index_id: Option<u32>,
    pub exact_key: Option<Bytes>,
    pub lower_bound: Bound<Bytes>,
    pub upper_bound: Bound<Bytes>,
}

#[derive(Debug, Clone)]
pub enum Request {
    RwGet {
        envelope: PrimaryEnvelope,
        key: Bytes,
    },
    RwGetAll {
        envelope: PrimaryEnvelope,
        keys: Vec<Bytes>,
    },
    RwScan {
        envelope: PrimaryEnvelope,
        scan: ScanSpec,
    },
    RwWrite {
        envelope: PrimaryEnvelope,
        key: Bytes,
        kind: WriteKind,
        value: Option<Bytes>,
        expected: Option<Bytes>,
        /// `true` when the caller wants the pre-mutation value back
        /// (`RW_GET_AND_*` request kinds).
        return_previous: bool,
    },
    RwWriteAll {
        envelope: PrimaryEnvelope,
        mutations: Vec<(Bytes, WriteKind, Option<Bytes>, Option<Bytes>)>,
    },
    RoGet {
        read_timestamp: HybridTimestamp,
        schema_version: Option<u64>,
        key: Bytes,
    },
    RoGetAll {
        read_timestamp: HybridTimestamp,
        schema_version: Option<u64>,
        keys: Vec<Bytes>,
    },
    RoScan {
        read_timestamp: HybridTimestamp,
        schema_version: Option<u64>,
        scan: ScanSpec,
    },
    /// A read-only request that chooses its own `now()` rather than
    /// carrying a client-supplied `readTimestamp` (§4.2 "RO-direct").
    RoDirectGet {
        schema_version: Option<u64>,
        key: Bytes,
    },
    RoDirectGetAll {
        schema_version: Option<u64>,
        keys: Vec<Bytes>,
    },
    ScanClose {
        tx_id: TransactionId,
        scan_id: u64,
    },
    TxFinish {
        tx_id: TransactionId,
        commit: bool,
        commit_timestamp: Option<HybridTimestamp>,
        enlisted: Vec<(ReplicationGroupId, u64)>,
    },
    WriteIntentSwitch {
        tx_id: TransactionId,
        commit: bool,
        commit_timestamp: Option<HybridTimestamp>,
        touched_rows: Vec<RowId>,
    },
    TxRecovery {
        tx_id: TransactionId,
    },
    TxStateCommitPartition {
        tx_id: TransactionId,
    },
    BuildIndex {
        index_id: u32,
        row_ids: Vec<RowId>,
    },
    SafeTimeSync,
}
