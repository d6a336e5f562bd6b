//! Local transaction-state bookkeeping, as kept by every replica that has
//! applied at least one command belonging to a transaction (§3 "Tx State
//! Meta (volatile)").

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use crate::ids::TransactionId;
use crate::txn::state::{TransactionResult, TxState, VolatileTxMeta};

/// Resolves a transaction id to its final commit/abort outcome, blocking
/// until one is known (§4.8 "resolve the intent's owning transaction").
/// Implemented by [`crate::txn::recovery::RecoveryCoordinator`], which
/// consults this tracker first and falls back to orphan recovery.
#[async_trait::async_trait]
pub trait TransactionStateResolver: Send + Sync {
    async fn resolve(&self, tx_id: TransactionId) -> crate::error::Result<TransactionResult>;
}

/// Tracks every transaction this replica has seen a command for, keyed by
/// id. Updated as commands apply (enlistment, finish) and consulted by
/// readers before deciding whether a write intent needs recovery.
pub struct TransactionStateTracker {
    states: StdMutex<HashMap<TransactionId, VolatileTxMeta>>,
}

impl TransactionStateTracker {
    pub fn new() -> Self {
        Self {
            states: StdMutex::new(HashMap::new()),
        }
    }

    pub fn record_pending(&self, tx_id: TransactionId, meta: VolatileTxMeta) {
        self.states.lock().unwrap().entry(tx_id).or_insert(meta);
    }

    pub fn record_finishing(&self, tx_id: TransactionId) {
        if let Some(meta) = self.states.lock().unwrap().get_mut(&tx_id) {
            meta.state = TxState::Finishing;
        }
    }

    pub fn record_result(&self, tx_id: TransactionId, result: TransactionResult) {
        let mut guard = self.states.lock().unwrap();
        let meta = guard
            .entry(tx_id)
            .or_insert_with(|| VolatileTxMeta::new_pending(None, None));
        match result {
            TransactionResult::Committed(ts) => {
                meta.state = TxState::Committed;
                meta.commit_timestamp = Some(ts);
            }
            TransactionResult::Aborted => {
                meta.state = TxState::Aborted;
            }
        }
    }

    pub fn record_abandoned(&self, tx_id: TransactionId) {
        if let Some(meta) = self.states.lock().unwrap().get_mut(&tx_id) {
            meta.state = TxState::Abandoned;
        }
    }

    pub fn local_result(&self, tx_id: TransactionId) -> Option<TransactionResult> {
        self.states.lock().unwrap().get(&tx_id).and_then(|m| m.result())
    }

    pub fn commit_partition(&self, tx_id: TransactionId) -> Option<crate::ids::ReplicationGroupId> {
        self.states
            .lock()
            .unwrap()
            .get(&tx_id)
            .and_then(|m| m.commit_partition_id)
    }

    /// Drops bookkeeping once a transaction's locks are known released
    /// everywhere (§4.5 step 6).
    pub fn forget(&self, tx_id: TransactionId) {
        self.states.lock().unwrap().remove(&tx_id);
    }
}

impl Default for TransactionStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A bare tracker only knows what this replica has locally applied; unlike
/// [`crate::txn::recovery::RecoveryCoordinator`] it never triggers orphan
/// recovery itself. A transaction with no recorded final state is marked
/// abandoned and surfaced as an error rather than silently treated as
/// committed or aborted (§4.8 "PENDING/ABORTED -> do not read the intent").
#[async_trait::async_trait]
impl TransactionStateResolver for TransactionStateTracker {
    async fn resolve(&self, tx_id: TransactionId) -> crate::error::Result<TransactionResult> {
        if let Some(result) = self.local_result(tx_id) {
            return Ok(result);
        }
        self.record_abandoned(tx_id);
        Err(crate::error::CoordinatorError::UnexpectedTransactionState(
            tx_id,
            "no final state known to this replica's tracker".to_string(),
        ))
    }
}
