//! Shared "cleanup" step of the finish protocol and orphan recovery (§4.5
//! step 4, §4.7 `durableCleanup`): releases a transaction's locks locally
//! and durably marks them released so its durable metadata can eventually
//! be garbage collected (§3 invariant #5).

use std::sync::Arc;

use crate::error::Result;
use crate::ids::{ReplicationGroupId, TransactionId};
use crate::locks::LockTableClient;
use crate::replication::commands::{MarkLocksReleasedCommand, ReplicatedCommand};
use crate::replication::ReplicationDispatcher;
use crate::txn::state_resolver::TransactionStateTracker;

pub struct TxCleanup {
    group_id: ReplicationGroupId,
    lock_table: LockTableClient,
    dispatcher: Arc<ReplicationDispatcher>,
    tracker: Arc<TransactionStateTracker>,
}

impl TxCleanup {
    pub fn new(group_id: ReplicationGroupId, lock_table: LockTableClient, dispatcher: Arc<ReplicationDispatcher>, tracker: Arc<TransactionStateTracker>) -> Self {
        Self {
            group_id,
            lock_table,
            dispatcher,
            tracker,
        }
    }

    /// Releases every lock `tx_id` holds on this partition, then submits
    /// `MarkLocksReleasedCommand` so the durable `locksReleased` flag flips.
    /// `_enlisted_partitions` names every partition the transaction touched;
    /// fanning this same cleanup out to those other partitions is the
    /// commit partition's job, one layer up from a single partition's
    /// coordinator (§1 Non-goals "cross-partition transaction commit
    /// coordination beyond what the commit partition performs").
    pub async fn run(&self, tx_id: TransactionId, _enlisted_partitions: Vec<ReplicationGroupId>) -> Result<()> {
        self.lock_table.release_tx_locks(tx_id).await?;

        self.dispatcher
            .submit(|safe_time| {
                ReplicatedCommand::MarkLocksReleased(MarkLocksReleasedCommand {
                    safe_time,
                    tx_id,
                    group_id: self.group_id,
                })
            })
            .await?;

        self.tracker.forget(tx_id);
        Ok(())
    }
}
