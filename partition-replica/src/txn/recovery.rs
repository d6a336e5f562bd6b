//! Orphan Transaction Recovery (spec §4.7, §4.8 "resolve the intent's
//! owning transaction").
//!
//! Triggered three ways: explicitly by a `TxRecoveryMessage` request on the
//! commit-partition primary ([`RecoveryCoordinator::handle_tx_recovery`]),
//! implicitly when a reader resolves a write intent whose durable outcome
//! is unknown locally ([`RecoveryCoordinator::resolve`], the
//! [`TransactionStateResolver`] impl consulted by `MvccReadResolver`), and
//! on `PrimaryElected` for this group, sweeping every finalized-but-not-
//! cleaned-up transaction the durable storage still knows about
//! ([`RecoveryCoordinator::on_primary_elected`]).

use std::sync::Arc;
use std::time::Duration;

use crate::error::{CoordinatorError, Result};
use crate::ids::{ReplicationGroupId, TransactionId};
use crate::ports::TxStateStorage;
use crate::replication::commands::{FinishTxCommand, ReplicatedCommand};
use crate::replication::ReplicationDispatcher;
use crate::txn::cleanup::TxCleanup;
use crate::txn::state::TransactionResult;
use crate::txn::state_resolver::{TransactionStateResolver, TransactionStateTracker};

/// Settles the fate of a transaction whose write intent a reader has
/// stumbled on but whose coordinator is unreachable or slow, and runs the
/// commit-partition side of orphan recovery. A rollback-finish is a no-op
/// where the transaction already committed durably (the finish protocol's
/// own already-final check handles that), so recovery never clobbers a
/// real commit.
pub struct RecoveryCoordinator {
    group_id: ReplicationGroupId,
    dispatcher: Arc<ReplicationDispatcher>,
    tracker: Arc<TransactionStateTracker>,
    tx_state_storage: Arc<dyn TxStateStorage>,
    cleanup: Arc<TxCleanup>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl RecoveryCoordinator {
    pub fn new(
        group_id: ReplicationGroupId,
        dispatcher: Arc<ReplicationDispatcher>,
        tracker: Arc<TransactionStateTracker>,
        tx_state_storage: Arc<dyn TxStateStorage>,
        cleanup: Arc<TxCleanup>,
        poll_attempts: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            group_id,
            dispatcher,
            tracker,
            tx_state_storage,
            cleanup,
            poll_attempts,
            poll_interval,
        }
    }

    /// `TxRecoveryMessage` (§4.7): if durable `Tx Meta` is already final,
    /// either nothing is left to do (`locksReleased=true`) or cleanup needs
    /// to run again; otherwise this transaction never reached a durable
    /// outcome and must be rolled back.
    pub async fn handle_tx_recovery(&self, tx_id: TransactionId) -> Result<()> {
        match self.tx_state_storage.read(tx_id).await? {
            Some(meta) if !meta.locks_released => self.cleanup.run(tx_id, meta.enlisted_partitions).await,
            Some(_) => Ok(()),
            None => self.rollback_finish(tx_id).await,
        }
    }

    /// `PrimaryElected` for this group (§4.7): scans durable storage for
    /// every finalized transaction whose locks are not yet released and
    /// schedules cleanup for each without waiting on it — the event itself
    /// completes immediately. Failures are logged and otherwise swallowed,
    /// matching §5's "errors are logged and suppressed-aggregated" rule for
    /// local-only cleanup.
    pub async fn on_primary_elected(&self) -> Result<()> {
        let pending = self.tx_state_storage.scan_pending_cleanup().await?;

        for meta in pending {
            let cleanup = self.cleanup.clone();
            let tx_id = meta.tx_id;
            let enlisted = meta.enlisted_partitions;
            async_std::task::spawn(async move {
                if let Err(e) = cleanup.run(tx_id, enlisted).await {
                    eprintln!("primary-elected cleanup for {} failed: {:?}", tx_id, e);
                }
            });
        }

        Ok(())
    }

    /// Submits a rollback-finish for `tx_id` on this (commit) partition
    /// (§4.7 "commit=false, term=0 for the commit partition only"). A
    /// `catalog_version` of 0 marks this as a recovery-originated finish
    /// rather than one stamped from a live transaction's validated
    /// catalog version.
    async fn rollback_finish(&self, tx_id: TransactionId) -> Result<()> {
        self.dispatcher
            .submit(|safe_time| {
                ReplicatedCommand::FinishTx(FinishTxCommand {
                    safe_time,
                    tx_id,
                    commit: false,
                    commit_timestamp: None,
                    catalog_version: 0,
                    enlisted_table_partition_ids: vec![self.group_id],
                })
            })
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TransactionStateResolver for RecoveryCoordinator {
    async fn resolve(&self, tx_id: TransactionId) -> Result<TransactionResult> {
        if let Some(result) = self.tracker.local_result(tx_id) {
            return Ok(result);
        }

        self.rollback_finish(tx_id).await?;

        for _ in 0..self.poll_attempts {
            if let Some(result) = self.tracker.local_result(tx_id) {
                return Ok(result);
            }
            async_std::task::sleep(self.poll_interval).await;
        }

        Err(CoordinatorError::UnexpectedTransactionState(
            tx_id,
            "recovery rollback did not converge on a final state".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{HybridClock, SafeTimeTracker};
    use crate::ids::HybridTimestamp;
    use crate::locks::LockTableClient;
    use crate::testing::fakes::{FakeLockManager, FakeReplicationClient, FakeRowStorage, FakeTxStateStorage};
    use crate::txn::state::DurableTxMeta;

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(HybridTimestamp::new(n, 0), 0)
    }

    fn group() -> ReplicationGroupId {
        ReplicationGroupId::new(1, 0)
    }

    fn wired() -> (Arc<FakeRowStorage>, Arc<FakeTxStateStorage>, Arc<TransactionStateTracker>, Arc<ReplicationDispatcher>) {
        let storage = Arc::new(FakeRowStorage::new());
        let tx_storage = Arc::new(FakeTxStateStorage::new());
        let tracker = Arc::new(TransactionStateTracker::new());
        let replication = Arc::new(FakeReplicationClient::wired(storage.clone(), tx_storage.clone(), tracker.clone()));
        let dispatcher = Arc::new(ReplicationDispatcher::new(replication, Arc::new(HybridClock::new()), Arc::new(SafeTimeTracker::new()), 3));
        (storage, tx_storage, tracker, dispatcher)
    }

    #[async_std::test]
    async fn resolve_rolls_back_an_orphan_and_returns_aborted() {
        let (_storage, tx_storage, tracker, dispatcher) = wired();
        let locks = Arc::new(FakeLockManager::new());
        let cleanup = Arc::new(TxCleanup::new(group(), LockTableClient::new(locks), dispatcher.clone(), tracker.clone()));
        let recovery = RecoveryCoordinator::new(group(), dispatcher, tracker, tx_storage, cleanup, 10, Duration::from_millis(1));

        let id = tx(1);
        let result = recovery.resolve(id).await.unwrap();
        assert_eq!(result, TransactionResult::Aborted);
    }

    #[async_std::test]
    async fn resolve_returns_local_result_without_rolling_back() {
        let (_storage, tx_storage, tracker, dispatcher) = wired();
        let locks = Arc::new(FakeLockManager::new());
        let cleanup = Arc::new(TxCleanup::new(group(), LockTableClient::new(locks), dispatcher.clone(), tracker.clone()));
        let recovery = RecoveryCoordinator::new(group(), dispatcher, tracker.clone(), tx_storage, cleanup, 10, Duration::from_millis(1));

        let id = tx(2);
        tracker.record_result(id, TransactionResult::Committed(HybridTimestamp::new(5, 0)));

        let result = recovery.resolve(id).await.unwrap();
        assert_eq!(result, TransactionResult::Committed(HybridTimestamp::new(5, 0)));
    }

    #[async_std::test]
    async fn handle_tx_recovery_runs_cleanup_for_a_final_uncleaned_tx() {
        use crate::ports::TxStateStorage as _;

        let (_storage, tx_storage, tracker, dispatcher) = wired();
        let locks = Arc::new(FakeLockManager::new());
        let cleanup = Arc::new(TxCleanup::new(group(), LockTableClient::new(locks), dispatcher.clone(), tracker.clone()));
        let recovery = RecoveryCoordinator::new(group(), dispatcher, tracker, tx_storage.clone(), cleanup, 10, Duration::from_millis(1));

        let id = tx(3);
        tx_storage
            .write(DurableTxMeta::new_committed(id, HybridTimestamp::new(9, 0), vec![group()]))
            .await
            .unwrap();

        recovery.handle_tx_recovery(id).await.unwrap();

        assert!(tx_storage.read(id).await.unwrap().unwrap().locks_released);
    }

    #[async_std::test]
    async fn on_primary_elected_schedules_cleanup_for_pending_transactions() {
        use crate::ports::TxStateStorage as _;

        let (_storage, tx_storage, tracker, dispatcher) = wired();
        let locks = Arc::new(FakeLockManager::new());
        let cleanup = Arc::new(TxCleanup::new(group(), LockTableClient::new(locks), dispatcher.clone(), tracker.clone()));
        let recovery = RecoveryCoordinator::new(group(), dispatcher, tracker, tx_storage.clone(), cleanup, 10, Duration::from_millis(1));

        let id = tx(4);
        tx_storage
            .write(DurableTxMeta::new_aborted(id, vec![group()]))
            .await
            .unwrap();

        recovery.on_primary_elected().await.unwrap();
        async_std::task::sleep(Duration::from_millis(20)).await;

        assert!(tx_storage.read(id).await.unwrap().unwrap().locks_released);
    }
}
