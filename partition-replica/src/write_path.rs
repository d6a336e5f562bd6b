//! Write Path (spec §4.4): PK resolution, lock acquisition, schema
//! re-validation, RAFT submission, and post-apply short-lock release for
//! every RW mutation kind.

use std::ops::Bound;
use std::sync::Arc;

use common::bytes::Bytes;

use crate::clock::HybridClock;
use crate::error::Result;
use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};
use crate::locks::{IndexLocker, IndexRow, LockMode, LockTableClient};
use crate::mvcc::MvccReadResolver;
use crate::ports::RowStorageEngine;
use crate::replication::commands::{ReplicatedCommand, RowMutation, UpdateAllCommand, UpdateCommand};
use crate::replication::ReplicationDispatcher;
use crate::schema::SchemaValidator;

/// Which RW mutation request kind drove a [`WritePath::write`] call (§6).
/// `GET_AND_*` request kinds reuse the matching base kind here; the
/// distinction between e.g. `RW_UPSERT` and `RW_GET_AND_UPSERT` is purely
/// about whether the caller surfaces [`WriteOutcome::previous_value`] to
/// the client, which this path always returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Upsert,
    Delete,
    /// Only applies if the existing value equals the one passed as
    /// `expected` (§8 boundary scenario 5 "Delete-exact miss").
    DeleteExact,
    Replace,
    ReplaceIfExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Whether a row mutation actually happened (and a command was
    /// submitted). `false` for an insert-over-existing, a delete of a
    /// missing row, or a delete-exact value mismatch.
    pub applied: bool,
    pub previous_value: Option<Bytes>,
}

pub struct WritePath {
    group_id: ReplicationGroupId,
    storage: Arc<dyn RowStorageEngine>,
    lock_table: LockTableClient,
    index_locker: Arc<IndexLocker>,
    resolver: Arc<MvccReadResolver>,
    schema: Arc<SchemaValidator>,
    dispatcher: Arc<ReplicationDispatcher>,
    clock: Arc<HybridClock>,
}

impl WritePath {
    pub fn new(
        group_id: ReplicationGroupId,
        storage: Arc<dyn RowStorageEngine>,
        lock_table: LockTableClient,
        index_locker: Arc<IndexLocker>,
        resolver: Arc<MvccReadResolver>,
        schema: Arc<SchemaValidator>,
        dispatcher: Arc<ReplicationDispatcher>,
        clock: Arc<HybridClock>,
    ) -> Self {
        Self {
            group_id,
            storage,
            lock_table,
            index_locker,
            resolver,
            schema,
            dispatcher,
            clock,
        }
    }

    /// Runs the full §4.4 sequence for a single-row mutation. `expected` is
    /// only consulted for [`WriteKind::DeleteExact`]. `full=true` marks a
    /// 1PC (implicit) transaction, which releases every lock it holds as
    /// soon as the command fully replicates (§4.4 "1PC transactions").
    #[allow(clippy::too_many_arguments)]
    pub async fn write(
        &self,
        tx_id: TransactionId,
        pk_index_id: u32,
        secondary_index_ids: &[u32],
        key: Bytes,
        kind: WriteKind,
        value: Option<Bytes>,
        expected: Option<Bytes>,
        tx_begin_schema_version: u64,
        full: bool,
    ) -> Result<WriteOutcome> {
        let pk_lock = self.index_locker.locks_for_lookup_by_key(tx_id, pk_index_id, key.clone()).await?;

        let (existing_row_id, existing_value, existing_commit_ts) = self.resolve_by_pk(tx_id, &key).await?;

        let applied = match kind {
            WriteKind::Insert => existing_row_id.is_none(),
            WriteKind::Upsert => true,
            WriteKind::Delete => existing_row_id.is_some(),
            WriteKind::DeleteExact => existing_row_id.is_some() && existing_value == expected,
            WriteKind::Replace | WriteKind::ReplaceIfExists => existing_row_id.is_some(),
        };

        if !applied {
            self.index_locker.release_short_term_locks(tx_id, vec![pk_lock]).await?;
            return Ok(WriteOutcome {
                applied: false,
                previous_value: existing_value,
            });
        }

        let new_value = match kind {
            WriteKind::Delete | WriteKind::DeleteExact => None,
            _ => value,
        };

        let row_id = existing_row_id.unwrap_or_else(|| RowId::generate(self.group_id.partition_id));
        let is_insert = existing_row_id.is_none();

        self.lock_table.lock_table(tx_id, self.group_id, LockMode::IX).await?;
        if !is_insert {
            self.lock_table.lock_row(tx_id, self.group_id, row_id, LockMode::X).await?;
        }

        let index_row = IndexRow { key: key.clone(), row_id };
        let mut short_term_locks = vec![pk_lock];
        if new_value.is_some() {
            short_term_locks.extend(self.index_locker.locks_for_insert(tx_id, secondary_index_ids, &index_row).await?);
        } else {
            short_term_locks.extend(self.index_locker.locks_for_remove(tx_id, secondary_index_ids, &index_row).await?);
        }

        let now = self.clock.now();
        let catalog_version = self.schema.fail_if_schema_changed_since_tx_start(tx_begin_schema_version, now).await?;

        self.resolver.await_row_cleanup(row_id).await;

        let index_mutations: Vec<(u32, Bytes, bool)> = secondary_index_ids.iter().map(|id| (*id, key.clone(), new_value.is_some())).collect();

        self.dispatcher
            .submit(|safe_time| {
                ReplicatedCommand::Update(UpdateCommand {
                    safe_time,
                    required_catalog_version: catalog_version,
                    tx_id,
                    row_id,
                    value: new_value.clone(),
                    index_mutations: index_mutations.clone(),
                    schema_version: tx_begin_schema_version,
                    newest_commit_timestamp: existing_commit_ts,
                    full,
                })
            })
            .await?;

        if full {
            self.lock_table.release_tx_locks(tx_id).await?;
        } else {
            self.index_locker.release_short_term_locks(tx_id, short_term_locks).await?;
        }

        Ok(WriteOutcome {
            applied: true,
            previous_value: existing_value,
        })
    }

    /// Multi-row analogue of [`Self::write`] (`RW_INSERT_ALL`,
    /// `RW_UPSERT_ALL`, `RW_DELETE_ALL`, `RW_DELETE_EXACT_ALL`, §6), one
    /// `UpdateAllCommand` covering every row that actually changed so the
    /// whole batch applies atomically on every replica (§4.4 step 3
    /// "Replicate the batched UpdateAllCommand"). Rows that don't apply
    /// (insert-over-existing, delete of a missing row, a delete-exact
    /// mismatch) are reported back but contribute nothing to the command.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_all(
        &self,
        tx_id: TransactionId,
        pk_index_id: u32,
        secondary_index_ids: &[u32],
        mutations: Vec<(Bytes, WriteKind, Option<Bytes>, Option<Bytes>)>,
        tx_begin_schema_version: u64,
        full: bool,
    ) -> Result<Vec<WriteOutcome>> {
        let mut outcomes = Vec::with_capacity(mutations.len());
        let mut row_mutations = Vec::new();
        let mut short_term_locks = Vec::new();
        let mut any_applied = false;

        for (key, kind, value, expected) in mutations {
            let pk_lock = self.index_locker.locks_for_lookup_by_key(tx_id, pk_index_id, key.clone()).await?;
            short_term_locks.push(pk_lock);

            let (existing_row_id, existing_value, existing_commit_ts) = self.resolve_by_pk(tx_id, &key).await?;

            let applied = match kind {
                WriteKind::Insert => existing_row_id.is_none(),
                WriteKind::Upsert => true,
                WriteKind::Delete => existing_row_id.is_some(),
                WriteKind::DeleteExact => existing_row_id.is_some() && existing_value == expected,
                WriteKind::Replace | WriteKind::ReplaceIfExists => existing_row_id.is_some(),
            };

            if !applied {
                outcomes.push(WriteOutcome {
                    applied: false,
                    previous_value: existing_value,
                });
                continue;
            }

            let new_value = match kind {
                WriteKind::Delete | WriteKind::DeleteExact => None,
                _ => value,
            };

            let row_id = existing_row_id.unwrap_or_else(|| RowId::generate(self.group_id.partition_id));
            let is_insert = existing_row_id.is_none();

            self.lock_table.lock_table(tx_id, self.group_id, LockMode::IX).await?;
            if !is_insert {
                self.lock_table.lock_row(tx_id, self.group_id, row_id, LockMode::X).await?;
            }

            let index_row = IndexRow { key: key.clone(), row_id };
            if new_value.is_some() {
                short_term_locks.extend(self.index_locker.locks_for_insert(tx_id, secondary_index_ids, &index_row).await?);
            } else {
                short_term_locks.extend(self.index_locker.locks_for_remove(tx_id, secondary_index_ids, &index_row).await?);
            }

            self.resolver.await_row_cleanup(row_id).await;

            any_applied = true;
            row_mutations.push(RowMutation {
                row_id,
                value: new_value.clone(),
                index_mutations: secondary_index_ids.iter().map(|id| (*id, key.clone(), new_value.is_some())).collect(),
                newest_commit_timestamp: existing_commit_ts,
            });
            outcomes.push(WriteOutcome {
                applied: true,
                previous_value: existing_value,
            });
        }

        if any_applied {
            let now = self.clock.now();
            let catalog_version = self.schema.fail_if_schema_changed_since_tx_start(tx_begin_schema_version, now).await?;

            self.dispatcher
                .submit(|safe_time| {
                    ReplicatedCommand::UpdateAll(UpdateAllCommand {
                        safe_time,
                        required_catalog_version: catalog_version,
                        tx_id,
                        rows: row_mutations.clone(),
                        schema_version: tx_begin_schema_version,
                        full,
                    })
                })
                .await?;
        }

        if full {
            self.lock_table.release_tx_locks(tx_id).await?;
        } else {
            self.index_locker.release_short_term_locks(tx_id, short_term_locks).await?;
        }

        Ok(outcomes)
    }

    /// §4.4 step 1 "Resolve by PK": look up the PK index, then read the row
    /// for this transaction (read-your-own-writes) at its begin timestamp.
    async fn resolve_by_pk(&self, tx_id: TransactionId, key: &Bytes) -> Result<(Option<RowId>, Option<Bytes>, Option<HybridTimestamp>)> {
        let hits = self.storage.scan_row_ids(Bound::Included(key.clone()), Bound::Included(key.clone()), 1).await?;
        let row_id = match hits.into_iter().next() {
            Some((_, id)) => id,
            None => return Ok((None, None, None)),
        };

        let candidates = self.storage.read_for_tx(row_id, tx_id).await?;
        let commit_ts = candidates.iter().find(|c| !c.is_write_intent()).and_then(|c| c.commit_timestamp);
        let resolved = self
            .resolver
            .resolve_versioned(row_id, candidates, tx_id.begin_timestamp(), Some(tx_id))
            .await?;

        match resolved {
            Some((value, _)) => Ok((Some(row_id), value, commit_ts)),
            None => Ok((None, None, commit_ts)),
        }
    }
}
