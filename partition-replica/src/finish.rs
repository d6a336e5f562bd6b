//! Finish Protocol and Write-Intent Switch (spec §4.5, §4.6).

use std::sync::Arc;

use crate::error::{CoordinatorError, Result};
use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};
use crate::ports::{CatalogService, TxStateStorage};
use crate::replication::commands::{FinishTxCommand, ReplicatedCommand, WriteIntentSwitchCommand};
use crate::replication::ReplicationDispatcher;
use crate::schema::SchemaValidator;
use crate::txn::cleanup::TxCleanup;
use crate::txn::cursor_registry::CursorRegistry;
use crate::txn::state::TransactionResult;
use crate::txn::state_resolver::TransactionStateTracker;

pub struct FinishPath {
    group_id: ReplicationGroupId,
    catalog: Arc<dyn CatalogService>,
    tx_state_storage: Arc<dyn TxStateStorage>,
    dispatcher: Arc<ReplicationDispatcher>,
    cleanup: Arc<TxCleanup>,
    cursor_registry: Arc<CursorRegistry>,
    tracker: Arc<TransactionStateTracker>,
}

impl FinishPath {
    pub fn new(
        group_id: ReplicationGroupId,
        catalog: Arc<dyn CatalogService>,
        tx_state_storage: Arc<dyn TxStateStorage>,
        dispatcher: Arc<ReplicationDispatcher>,
        cleanup: Arc<TxCleanup>,
        cursor_registry: Arc<CursorRegistry>,
        tracker: Arc<TransactionStateTracker>,
    ) -> Self {
        Self {
            group_id,
            catalog,
            tx_state_storage,
            dispatcher,
            cleanup,
            cursor_registry,
            tracker,
        }
    }

    /// `TxFinish(commit, commitTimestamp, enlistedGroups)` (§4.5).
    /// `enlisted` pairs every table-partition this transaction touched with
    /// the schema version it read under at begin, for forward-compatibility
    /// validation at commit.
    pub async fn finish(
        &self,
        tx_id: TransactionId,
        mut commit: bool,
        commit_timestamp: Option<HybridTimestamp>,
        enlisted: Vec<(ReplicationGroupId, u64)>,
    ) -> Result<TransactionResult> {
        let mut finalize_as_schema_abort = false;

        if commit {
            let ts = commit_timestamp.expect("commit requires a commit timestamp");
            for (group, begin_schema_version) in &enlisted {
                let validator = SchemaValidator::new(*group, self.catalog.clone());
                if validator.validate_forward_compatible_at_commit(*begin_schema_version, ts).await.is_err() {
                    commit = false;
                    finalize_as_schema_abort = true;
                    break;
                }
            }
        }

        if let Some(stored) = self.tx_state_storage.read(tx_id).await? {
            if stored.is_committed() != commit && !matches!(stored.result, TransactionResult::Committed(_) if !commit) {
                // Requested commit over a durably-aborted outcome is the
                // only disallowed transition (§4.5 step 2); rollback is
                // always allowed, including overriding a stored commit.
                if commit {
                    return Err(CoordinatorError::TransactionAlreadyFinished(tx_id, stored.result));
                }
            }
            if stored.locks_released {
                return Ok(stored.result);
            }
            // Retry: already final but cleanup hadn't finished. Fall through
            // and re-run it without resubmitting a finish command for an
            // outcome that's already durable.
            self.cleanup.run(tx_id, enlisted.iter().map(|(g, _)| *g).collect()).await?;
            return Ok(stored.result);
        }

        let enlisted_groups: Vec<ReplicationGroupId> = enlisted.iter().map(|(g, _)| *g).collect();
        let catalog_version = self.catalog.reliable_catalog_version_at(commit_timestamp.unwrap_or(HybridTimestamp::MIN)).await?;

        self.tracker.record_finishing(tx_id);

        self.dispatcher
            .submit(|safe_time| {
                ReplicatedCommand::FinishTx(FinishTxCommand {
                    safe_time,
                    tx_id,
                    commit,
                    commit_timestamp: if commit { commit_timestamp } else { None },
                    catalog_version,
                    enlisted_table_partition_ids: enlisted_groups.clone(),
                })
            })
            .await?;

        self.cleanup.run(tx_id, enlisted_groups).await?;

        if finalize_as_schema_abort {
            return Err(CoordinatorError::IncompatibleSchemaAbort(tx_id));
        }

        let result = if commit {
            TransactionResult::Committed(commit_timestamp.unwrap_or(HybridTimestamp::MIN))
        } else {
            TransactionResult::Aborted
        };
        Ok(result)
    }

    /// `WriteIntentSwitch(txId, commit, commitTimestamp)` (§4.6): closes
    /// every cursor registered for `tx_id`, marks the volatile meta final,
    /// then switches every row the transaction touched. Draining the
    /// transaction's own in-flight read/update futures (step 3) is the
    /// listener's job, one layer above this call, since only it tracks
    /// per-request futures.
    pub async fn write_intent_switch(&self, tx_id: TransactionId, commit: bool, commit_timestamp: Option<HybridTimestamp>, touched_rows: Vec<RowId>) -> Result<()> {
        self.cursor_registry.close_tx(tx_id).await;

        let result = if commit {
            TransactionResult::Committed(commit_timestamp.unwrap_or(HybridTimestamp::MIN))
        } else {
            TransactionResult::Aborted
        };
        self.tracker.record_result(tx_id, result);

        for row_id in touched_rows {
            self.dispatcher
                .submit(|safe_time| {
                    ReplicatedCommand::WriteIntentSwitch(WriteIntentSwitchCommand {
                        safe_time,
                        required_catalog_version: 0,
                        tx_id,
                        row_id,
                        commit,
                        commit_timestamp,
                    })
                })
                .await?;
        }

        Ok(())
    }

    pub fn group_id(&self) -> ReplicationGroupId {
        self.group_id
    }
}
