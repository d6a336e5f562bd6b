//! Lock Table Client (spec §2): typed request/release of table and row
//! locks, on top of the out-of-scope lock manager.

use std::sync::Arc;

use crate::error::Result;
use crate::ids::{ReplicationGroupId, RowId, TransactionId};
use crate::locks::{LockKey, LockMode};
use crate::ports::LockManagerClient;

#[derive(Clone)]
pub struct LockTableClient {
    manager: Arc<dyn LockManagerClient>,
}

impl LockTableClient {
    pub fn new(manager: Arc<dyn LockManagerClient>) -> Self {
        Self { manager }
    }

    pub async fn lock_table(
        &self,
        tx_id: TransactionId,
        group_id: ReplicationGroupId,
        mode: LockMode,
    ) -> Result<()> {
        self.manager
            .acquire(tx_id, LockKey::Table(group_id), mode)
            .await
    }

    pub async fn lock_row(
        &self,
        tx_id: TransactionId,
        group_id: ReplicationGroupId,
        row_id: RowId,
        mode: LockMode,
    ) -> Result<()> {
        self.manager
            .acquire(tx_id, LockKey::Row(group_id, row_id), mode)
            .await
    }

    pub async fn unlock_row(
        &self,
        tx_id: TransactionId,
        group_id: ReplicationGroupId,
        row_id: RowId,
    ) -> Result<()> {
        self.manager
            .release(tx_id, LockKey::Row(group_id, row_id))
            .await
    }

    /// Releases every lock held by `tx_id` across all key kinds. Called at
    /// 1PC completion and at the end of the finish protocol (§4.4, §4.5).
    pub async fn release_tx_locks(&self, tx_id: TransactionId) -> Result<()> {
        self.manager.release_all(tx_id).await
    }
}
