//! Transaction state, per spec §3 "Tx State Meta (volatile)" / "Tx Meta
//! (durable)".

use crate::ids::{HybridTimestamp, ReplicationGroupId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Finishing,
    Committed,
    Aborted,
    /// The transaction's coordinator has disappeared from the cluster
    /// roster and recovery could not immediately determine a final
    /// outcome; a subsequent rollback-finish will settle it (§4.7).
    Abandoned,
}

impl TxState {
    pub fn is_final(&self) -> bool {
        matches!(self, TxState::Committed | TxState::Aborted)
    }
}

/// The durable outcome of a finished transaction, as returned to retrying
/// finishers (spec §4.5 step 2) and embedded in `TransactionAlreadyFinished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionResult {
    Committed(HybridTimestamp),
    Aborted,
}

/// Process-wide, in-memory metadata for a transaction, created on first
/// write/scan enlistment (§3 "Lifecycles") and keyed by `TransactionId` in
/// `TransactionStateResolver`.
#[derive(Debug, Clone)]
pub struct VolatileTxMeta {
    pub state: TxState,
    pub coordinator_node_id: Option<String>,
    pub commit_partition_id: Option<ReplicationGroupId>,
    pub commit_timestamp: Option<HybridTimestamp>,
}

impl VolatileTxMeta {
    pub fn new_pending(
        coordinator_node_id: Option<String>,
        commit_partition_id: Option<ReplicationGroupId>,
    ) -> Self {
        Self {
            state: TxState::Pending,
            coordinator_node_id,
            commit_partition_id,
            commit_timestamp: None,
        }
    }

    pub fn result(&self) -> Option<TransactionResult> {
        match self.state {
            TxState::Committed => Some(TransactionResult::Committed(
                self.commit_timestamp.unwrap_or(HybridTimestamp::MIN),
            )),
            TxState::Aborted => Some(TransactionResult::Aborted),
            _ => None,
        }
    }
}

/// Durable record, persisted only on the commit partition (§3), restricted
/// to final states.
#[derive(Debug, Clone)]
pub struct DurableTxMeta {
    pub tx_id: TransactionId,
    pub result: TransactionResult,
    pub enlisted_partitions: Vec<ReplicationGroupId>,
    pub locks_released: bool,
}

impl DurableTxMeta {
    pub fn new_committed(
        tx_id: TransactionId,
        commit_timestamp: HybridTimestamp,
        enlisted_partitions: Vec<ReplicationGroupId>,
    ) -> Self {
        Self {
            tx_id,
            result: TransactionResult::Committed(commit_timestamp),
            enlisted_partitions,
            locks_released: false,
        }
    }

    pub fn new_aborted(tx_id: TransactionId, enlisted_partitions: Vec<ReplicationGroupId>) -> Self {
        Self {
            tx_id,
            result: TransactionResult::Aborted,
            enlisted_partitions,
            locks_released: false,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.result, TransactionResult::Committed(_))
    }
}
