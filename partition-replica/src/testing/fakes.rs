//! Concrete, in-memory implementations of every trait in [`crate::ports`],
//! used by unit tests throughout this crate. None of these are meant to be
//! realistic storage/replication engines — they're the minimum needed to
//! exercise the coordinator's own logic deterministically, the same role
//! the reference crate's `TestMetastore` plays for `Metastore`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_std::sync::Mutex as AsyncMutex;
use common::bytes::Bytes;

use crate::error::{CoordinatorError, Result};
use crate::ids::{HybridTimestamp, ReplicationGroupId, RowId, TransactionId};
use crate::locks::{LockKey, LockMode};
use crate::mvcc::ReadResult;
use crate::ports::{
    CatalogService, ClusterRosterClient, LockManagerClient, PendingReplication, PendingReplicationHandle, PlacementDriverClient,
    PrimaryLease, ReplicationClient, RowStorageEngine, TupleCodec, TxStateStorage,
};
use crate::replication::commands::ReplicatedCommand;
use crate::txn::state::{DurableTxMeta, TransactionResult};
use crate::txn::state_resolver::TransactionStateTracker;

// ---------------------------------------------------------------------
// Placement driver
// ---------------------------------------------------------------------

pub struct FakePlacementDriver {
    lease: PrimaryLease,
}

impl FakePlacementDriver {
    pub fn leased_to(leaseholder: &str, start_time: u64, expiration_time: u64) -> Self {
        Self {
            lease: PrimaryLease {
                leaseholder: leaseholder.to_string(),
                start_time,
                expiration_time,
            },
        }
    }
}

#[async_trait::async_trait]
impl PlacementDriverClient for FakePlacementDriver {
    async fn current_lease(&self, _group_id: ReplicationGroupId, _now: HybridTimestamp) -> Result<PrimaryLease> {
        Ok(self.lease.clone())
    }
}

// ---------------------------------------------------------------------
// Catalog / schema registry
// ---------------------------------------------------------------------

pub struct FakeCatalogService {
    inner: AsyncMutex<CatalogState>,
}

struct CatalogState {
    exists: bool,
    version: u64,
    backward_compatible: bool,
    forward_compatible: bool,
}

impl FakeCatalogService {
    pub fn new(version: u64) -> Self {
        Self {
            inner: AsyncMutex::new(CatalogState {
                exists: true,
                version,
                backward_compatible: true,
                forward_compatible: true,
            }),
        }
    }

    pub async fn set_exists(&self, exists: bool) {
        self.inner.lock().await.exists = exists;
    }

    pub async fn set_version(&self, version: u64) {
        self.inner.lock().await.version = version;
    }

    pub async fn set_backward_compatible(&self, v: bool) {
        self.inner.lock().await.backward_compatible = v;
    }

    pub async fn set_forward_compatible(&self, v: bool) {
        self.inner.lock().await.forward_compatible = v;
    }
}

#[async_trait::async_trait]
impl CatalogService for FakeCatalogService {
    async fn schema_version_at(&self, _group_id: ReplicationGroupId, _timestamp: HybridTimestamp) -> Result<Option<u64>> {
        let state = self.inner.lock().await;
        Ok(if state.exists { Some(state.version) } else { None })
    }

    async fn reliable_catalog_version_at(&self, _timestamp: HybridTimestamp) -> Result<u64> {
        Ok(self.inner.lock().await.version)
    }

    async fn is_backward_compatible(&self, _group_id: ReplicationGroupId, _old_version: u64, _new_version: u64) -> Result<bool> {
        Ok(self.inner.lock().await.backward_compatible)
    }

    async fn is_forward_compatible(&self, _group_id: ReplicationGroupId, _old_version: u64, _new_version: u64) -> Result<bool> {
        Ok(self.inner.lock().await.forward_compatible)
    }

    async fn wait_for_metadata_completeness(&self, _timestamp: HybridTimestamp) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Row storage engine
// ---------------------------------------------------------------------

#[derive(Default, Clone)]
struct RowState {
    committed: Option<ReadResult>,
    intent: Option<ReadResult>,
}

pub struct FakeRowStorage {
    rows: AsyncMutex<HashMap<RowId, RowState>>,
    index: AsyncMutex<BTreeMap<Bytes, RowId>>,
}

impl FakeRowStorage {
    pub fn new() -> Self {
        Self {
            rows: AsyncMutex::new(HashMap::new()),
            index: AsyncMutex::new(BTreeMap::new()),
        }
    }

    /// Seeds a committed row, as if an earlier transaction already
    /// committed it, and indexes it under `key` for scans.
    pub async fn seed_committed(&self, row_id: RowId, key: Bytes, value: Option<Bytes>, commit_timestamp: HybridTimestamp, schema_version: u64) {
        let result = ReadResult {
            row_id,
            value,
            tx_id: None,
            commit_timestamp: Some(commit_timestamp),
            newest_commit_timestamp: None,
            commit_table_id: None,
            commit_partition_id: None,
            schema_version,
        };
        self.rows.lock().await.entry(row_id).or_default().committed = Some(result);
        self.index.lock().await.insert(key, row_id);
    }

    /// Seeds a raw, unresolved write intent belonging to `tx_id`, as if a
    /// transaction wrote it and its commit partition is not this replica.
    pub async fn seed_intent(&self, row_id: RowId, key: Bytes, tx_id: TransactionId, value: Option<Bytes>, schema_version: u64) {
        let result = ReadResult {
            row_id,
            value,
            tx_id: Some(tx_id),
            commit_timestamp: None,
            newest_commit_timestamp: None,
            commit_table_id: None,
            commit_partition_id: None,
            schema_version,
        };
        self.rows.lock().await.entry(row_id).or_default().intent = Some(result);
        self.index.lock().await.insert(key, row_id);
    }

    pub async fn index_key(&self, key: Bytes, row_id: RowId) {
        self.index.lock().await.insert(key, row_id);
    }
}

#[async_trait::async_trait]
impl RowStorageEngine for FakeRowStorage {
    async fn read(&self, row_id: RowId, _read_timestamp: HybridTimestamp) -> Result<Vec<ReadResult>> {
        let rows = self.rows.lock().await;
        let mut out = Vec::new();
        if let Some(state) = rows.get(&row_id) {
            out.extend(state.committed.clone());
            out.extend(state.intent.clone());
        }
        Ok(out)
    }

    async fn read_for_tx(&self, row_id: RowId, tx_id: TransactionId) -> Result<Vec<ReadResult>> {
        let rows = self.rows.lock().await;
        let mut out = Vec::new();
        if let Some(state) = rows.get(&row_id) {
            out.extend(state.committed.clone());
            if let Some(intent) = &state.intent {
                if intent.tx_id == Some(tx_id) {
                    out.push(intent.clone());
                }
            }
        }
        Ok(out)
    }

    async fn scan_row_ids(&self, lower: Bound<Bytes>, upper: Bound<Bytes>, limit: usize) -> Result<Vec<(Bytes, RowId)>> {
        let index = self.index.lock().await;
        Ok(index.range((lower, upper)).take(limit).map(|(key, row_id)| (key.clone(), *row_id)).collect())
    }

    async fn write_intent(&self, tx_id: TransactionId, row_id: RowId, value: Option<Bytes>, schema_version: u64) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let state = rows.entry(row_id).or_default();
        let newest_commit_timestamp = state.committed.as_ref().and_then(|c| c.commit_timestamp);
        state.intent = Some(ReadResult {
            row_id,
            value,
            tx_id: Some(tx_id),
            commit_timestamp: None,
            newest_commit_timestamp,
            commit_table_id: None,
            commit_partition_id: None,
            schema_version,
        });
        Ok(())
    }

    async fn switch_write_intent(&self, row_id: RowId, tx_id: TransactionId, commit: bool, commit_timestamp: Option<HybridTimestamp>) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(state) = rows.get_mut(&row_id) {
            let owns = state.intent.as_ref().map(|i| i.tx_id) == Some(Some(tx_id));
            if owns {
                if commit {
                    let intent = state.intent.clone().expect("checked owns above");
                    state.committed = Some(ReadResult {
                        row_id,
                        value: intent.value,
                        tx_id: None,
                        commit_timestamp,
                        newest_commit_timestamp: state.committed.as_ref().and_then(|c| c.commit_timestamp),
                        commit_table_id: None,
                        commit_partition_id: None,
                        schema_version: intent.schema_version,
                    });
                }
                state.intent = None;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Lock manager
// ---------------------------------------------------------------------

pub struct FakeLockManager {
    locks: AsyncMutex<HashMap<LockKey, Vec<(TransactionId, LockMode)>>>,
}

impl FakeLockManager {
    pub fn new() -> Self {
        Self {
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn holds(&self, tx_id: TransactionId, key: &LockKey) -> Option<LockMode> {
        self.locks
            .lock()
            .await
            .get(key)
            .and_then(|holders| holders.iter().find(|(id, _)| *id == tx_id).map(|(_, mode)| *mode))
    }
}

#[async_trait::async_trait]
impl LockManagerClient for FakeLockManager {
    async fn acquire(&self, tx_id: TransactionId, key: LockKey, mode: LockMode) -> Result<()> {
        let mut locks = self.locks.lock().await;
        let holders = locks.entry(key).or_insert_with(Vec::new);
        if !holders.iter().any(|(id, _)| *id == tx_id) {
            holders.push((tx_id, mode));
        }
        Ok(())
    }

    async fn release(&self, tx_id: TransactionId, key: LockKey) -> Result<()> {
        if let Some(holders) = self.locks.lock().await.get_mut(&key) {
            holders.retain(|(id, _)| *id != tx_id);
        }
        Ok(())
    }

    async fn release_all(&self, tx_id: TransactionId) -> Result<()> {
        for holders in self.locks.lock().await.values_mut() {
            holders.retain(|(id, _)| *id != tx_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Replication client
// ---------------------------------------------------------------------

pub struct FakePendingReplication {
    safe_time: HybridTimestamp,
}

#[async_trait::async_trait]
impl PendingReplicationHandle for FakePendingReplication {
    async fn wait_applied(&self) -> Result<HybridTimestamp> {
        Ok(self.safe_time)
    }
}

/// A single-node "replication" client: `submit` applies the command's side
/// effects immediately (if wired to storage/tx-state fakes) and returns an
/// already-applied pending handle, standing in for a Raft group of size
/// one. Can be told to fail the next N submissions with
/// [`CoordinatorError::SafeTimeReorder`] to exercise the dispatcher's
/// retry loop.
pub struct FakeReplicationClient {
    reject_reorder: AtomicU32,
    storage: Option<Arc<FakeRowStorage>>,
    tx_storage: Option<Arc<FakeTxStateStorage>>,
    tracker: Option<Arc<TransactionStateTracker>>,
}

impl FakeReplicationClient {
    pub fn new() -> Self {
        Self {
            reject_reorder: AtomicU32::new(0),
            storage: None,
            tx_storage: None,
            tracker: None,
        }
    }

    pub fn wired(storage: Arc<FakeRowStorage>, tx_storage: Arc<FakeTxStateStorage>, tracker: Arc<TransactionStateTracker>) -> Self {
        Self {
            reject_reorder: AtomicU32::new(0),
            storage: Some(storage),
            tx_storage: Some(tx_storage),
            tracker: Some(tracker),
        }
    }

    pub fn reject_next_n_with_reorder(&self, n: u32) {
        self.reject_reorder.store(n, Ordering::SeqCst);
    }

    async fn apply(&self, command: &ReplicatedCommand) -> Result<()> {
        match command {
            ReplicatedCommand::Update(c) => {
                if let Some(storage) = &self.storage {
                    storage.write_intent(c.tx_id, c.row_id, c.value.clone(), c.schema_version).await?;
                }
            }
            ReplicatedCommand::UpdateAll(c) => {
                if let Some(storage) = &self.storage {
                    for row in &c.rows {
                        storage.write_intent(c.tx_id, row.row_id, row.value.clone(), c.schema_version).await?;
                    }
                }
            }
            ReplicatedCommand::FinishTx(c) => {
                if let (Some(tx_storage), Some(tracker)) = (&self.tx_storage, &self.tracker) {
                    let result = if c.commit {
                        TransactionResult::Committed(c.commit_timestamp.unwrap_or(c.safe_time))
                    } else {
                        TransactionResult::Aborted
                    };
                    tracker.record_result(c.tx_id, result);
                    let meta = match result {
                        TransactionResult::Committed(ts) => DurableTxMeta::new_committed(c.tx_id, ts, c.enlisted_table_partition_ids.clone()),
                        TransactionResult::Aborted => DurableTxMeta::new_aborted(c.tx_id, c.enlisted_table_partition_ids.clone()),
                    };
                    tx_storage.write(meta).await?;
                }
            }
            ReplicatedCommand::WriteIntentSwitch(c) => {
                if let Some(storage) = &self.storage {
                    storage.switch_write_intent(c.row_id, c.tx_id, c.commit, c.commit_timestamp).await?;
                }
            }
            ReplicatedCommand::MarkLocksReleased(c) => {
                if let Some(tx_storage) = &self.tx_storage {
                    tx_storage.mark_locks_released(c.tx_id).await?;
                }
            }
            ReplicatedCommand::BuildIndex(_) | ReplicatedCommand::SafeTimeSync(_) => {}
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReplicationClient for FakeReplicationClient {
    async fn submit(&self, command: ReplicatedCommand) -> Result<PendingReplication> {
        if self.reject_reorder.load(Ordering::SeqCst) > 0 {
            self.reject_reorder.fetch_sub(1, Ordering::SeqCst);
            return Err(CoordinatorError::SafeTimeReorder);
        }

        let safe_time = command.safe_time().unwrap_or(HybridTimestamp::MIN);
        self.apply(&command).await?;

        Ok(PendingReplication(Arc::new(FakePendingReplication { safe_time })))
    }
}

// ---------------------------------------------------------------------
// Cluster roster
// ---------------------------------------------------------------------

pub struct FakeClusterRoster {
    members: AsyncMutex<HashSet<String>>,
}

impl FakeClusterRoster {
    pub fn with_members(names: &[&str]) -> Self {
        Self {
            members: AsyncMutex::new(names.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub async fn remove(&self, name: &str) {
        self.members.lock().await.remove(name);
    }
}

#[async_trait::async_trait]
impl ClusterRosterClient for FakeClusterRoster {
    async fn is_member(&self, node_id: &str) -> Result<bool> {
        Ok(self.members.lock().await.contains(node_id))
    }
}

// ---------------------------------------------------------------------
// Durable tx state storage
// ---------------------------------------------------------------------

pub struct FakeTxStateStorage {
    entries: AsyncMutex<HashMap<TransactionId, DurableTxMeta>>,
}

impl FakeTxStateStorage {
    pub fn new() -> Self {
        Self {
            entries: AsyncMutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl TxStateStorage for FakeTxStateStorage {
    async fn read(&self, tx_id: TransactionId) -> Result<Option<DurableTxMeta>> {
        Ok(self.entries.lock().await.get(&tx_id).cloned())
    }

    async fn write(&self, meta: DurableTxMeta) -> Result<()> {
        self.entries.lock().await.insert(meta.tx_id, meta);
        Ok(())
    }

    async fn mark_locks_released(&self, tx_id: TransactionId) -> Result<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(&tx_id) {
            entry.locks_released = true;
        }
        Ok(())
    }

    async fn scan_pending_cleanup(&self) -> Result<Vec<DurableTxMeta>> {
        Ok(self.entries.lock().await.values().filter(|m| !m.locks_released).cloned().collect())
    }
}

// ---------------------------------------------------------------------
// Tuple codec
// ---------------------------------------------------------------------

/// Treats the opaque row as already being its own primary key (and, for
/// any index, its own index key) — sufficient for tests, which construct
/// rows that already are the bytes they want extracted.
pub struct FakeTupleCodec;

impl TupleCodec for FakeTupleCodec {
    fn primary_key_bytes(&self, row: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(row))
    }

    fn index_key_bytes(&self, row: &[u8], _index_id: u32) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(row))
    }
}
