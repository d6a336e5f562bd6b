//! Resolves the value visible to a reader out of a row's committed entry
//! plus at most one write intent (§3, §4.3, §4.8).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_std::sync::Mutex as AsyncMutex;
use common::bytes::Bytes;

use crate::error::Result;
use crate::ids::{HybridTimestamp, RowId, TransactionId};
use crate::mvcc::read_result::ReadResult;
use crate::ports::RowStorageEngine;
use crate::txn::state::TransactionResult;
use crate::txn::state_resolver::TransactionStateResolver;

const MAX_NEWEST_COMMIT_CHAIN: usize = 8;

/// Dedupes concurrent resolutions of the same `(row_id, tx_id)` write
/// intent: several readers hitting the same unresolved intent at once
/// should trigger one recovery attempt and one storage switch, not one per
/// reader (§4.8 "async cleanup dedup map").
pub struct MvccReadResolver {
    state_resolver: Arc<dyn TransactionStateResolver>,
    storage: Arc<dyn RowStorageEngine>,
    in_flight_switches: Arc<AsyncMutex<HashSet<(RowId, TransactionId)>>>,
}

impl MvccReadResolver {
    pub fn new(state_resolver: Arc<dyn TransactionStateResolver>, storage: Arc<dyn RowStorageEngine>) -> Self {
        Self {
            state_resolver,
            storage,
            in_flight_switches: Arc::new(AsyncMutex::new(HashSet::new())),
        }
    }

    /// Returns the value (`None` = not-present/tombstone) visible to a
    /// reader at `read_timestamp`, given every candidate version storage
    /// returned for a row. `reading_tx` is `Some` for a read performed
    /// inside the same transaction that may own the row's write intent
    /// (read-your-own-writes).
    pub async fn resolve(
        &self,
        row_id: RowId,
        candidates: Vec<ReadResult>,
        read_timestamp: HybridTimestamp,
        reading_tx: Option<TransactionId>,
    ) -> Result<Option<Bytes>> {
        Ok(self
            .resolve_versioned(row_id, candidates, read_timestamp, reading_tx)
            .await?
            .and_then(|(value, _)| value))
    }

    /// Like [`Self::resolve`], but also surfaces the `schemaVersion` of
    /// whichever version was chosen, for the RW batch's backward-
    /// compatibility check (§4.3). Returns `None` only when nothing at all
    /// was visible (no candidates, or none visible at `read_timestamp`); a
    /// visible tombstone still reports its `schemaVersion` with `value =
    /// None`.
    pub async fn resolve_versioned(
        &self,
        row_id: RowId,
        candidates: Vec<ReadResult>,
        read_timestamp: HybridTimestamp,
        reading_tx: Option<TransactionId>,
    ) -> Result<Option<(Option<Bytes>, u64)>> {
        let mut committed: Option<ReadResult> = None;
        let mut intent: Option<ReadResult> = None;

        for candidate in candidates {
            if candidate.is_write_intent() {
                // Invariant (§3 #1): at most one write intent per row slot.
                debug_assert!(intent.is_none(), "storage returned two write intents for the same row");
                intent = Some(candidate);
            } else {
                committed = Some(candidate);
            }
        }

        let intent = match intent {
            Some(i) => i,
            None => return Ok(visible(committed, read_timestamp)),
        };

        let intent_tx = intent.tx_id.expect("write intent always carries a tx id");

        if reading_tx == Some(intent_tx) {
            return Ok(Some((intent.value, intent.schema_version)));
        }

        let result = self.state_resolver.resolve(intent_tx).await?;

        match result {
            TransactionResult::Committed(commit_ts) => {
                self.schedule_switch(row_id, intent_tx, true, Some(commit_ts));
                if commit_ts <= read_timestamp {
                    return Ok(Some((intent.value, intent.schema_version)));
                }
                // The intent's own transaction committed, but too late for
                // this reader. Walk the newest-commit-timestamp chain
                // backwards looking for a version this reader can see,
                // instead of falling straight to `committed`, which may
                // itself be older than an intermediate version storage
                // already knows about (§4.8).
                if let Some(found) = self.walk_newest_commit_chain(row_id, &intent, read_timestamp).await? {
                    return Ok(Some(found));
                }
            }
            TransactionResult::Aborted => {
                self.schedule_switch(row_id, intent_tx, false, None);
            }
        }

        Ok(visible(committed, read_timestamp))
    }

    /// Re-reads `row_id` at each `newestCommitTimestamp` hint in turn,
    /// looking for the first committed version at or before
    /// `read_timestamp`. Bounded so a pathological hint chain can't loop
    /// forever.
    async fn walk_newest_commit_chain(
        &self,
        row_id: RowId,
        intent: &ReadResult,
        read_timestamp: HybridTimestamp,
    ) -> Result<Option<(Option<Bytes>, u64)>> {
        let mut cursor = intent.newest_commit_timestamp;

        for _ in 0..MAX_NEWEST_COMMIT_CHAIN {
            let ts = match cursor {
                Some(ts) => ts,
                None => return Ok(None),
            };

            let candidates = self.storage.read(row_id, ts).await?;
            let mut next_cursor = None;
            for candidate in candidates {
                if candidate.is_write_intent() {
                    continue;
                }
                if candidate.is_visible_at(read_timestamp) {
                    return Ok(Some((candidate.value, candidate.schema_version)));
                }
                next_cursor = candidate.newest_commit_timestamp;
            }
            cursor = next_cursor;
        }

        Ok(None)
    }

    /// Blocks until any async write-intent switch already in flight for
    /// `row_id` (under any transaction) finishes, so a new write doesn't
    /// race a lagging cleanup for the row's previous owner (§4.4 step 4,
    /// §4.8 "readers await it before starting RW writes on the same
    /// row-id").
    pub async fn await_row_cleanup(&self, row_id: RowId) {
        loop {
            let pending = self.in_flight_switches.lock().await.iter().any(|(r, _)| *r == row_id);
            if !pending {
                return;
            }
            async_std::task::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Fires off (at most once per `(row_id, tx_id)` pair concurrently) the
    /// local storage switch that turns a now-resolved write intent into a
    /// committed tombstone/value or removes it, so future readers don't pay
    /// the resolution cost again (§4.8).
    fn schedule_switch(&self, row_id: RowId, tx_id: TransactionId, commit: bool, commit_timestamp: Option<HybridTimestamp>) {
        let key = (row_id, tx_id);
        let storage = self.storage.clone();
        let in_flight = self.in_flight_switches.clone();

        async_std::task::spawn(async move {
            {
                let mut guard = in_flight.lock().await;
                if guard.contains(&key) {
                    return;
                }
                guard.insert(key);
            }

            if let Err(e) = storage.switch_write_intent(row_id, tx_id, commit, commit_timestamp).await {
                eprintln!("write-intent cleanup for {:?} failed: {:?}", key, e);
            }

            in_flight.lock().await.remove(&key);
        });
    }
}

fn visible(committed: Option<ReadResult>, read_timestamp: HybridTimestamp) -> Option<(Option<Bytes>, u64)> {
    committed
        .filter(|c| c.is_visible_at(read_timestamp))
        .map(|c| (c.value, c.schema_version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::HybridTimestamp;
    use crate::testing::fakes::FakeRowStorage;
    use crate::txn::state_resolver::TransactionStateTracker;

    fn row() -> RowId {
        RowId::generate(0)
    }

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(HybridTimestamp::new(n, 0), 0)
    }

    #[async_std::test]
    async fn no_intent_returns_the_committed_value_if_visible() {
        let tracker = Arc::new(TransactionStateTracker::new());
        let storage = Arc::new(FakeRowStorage::new());
        let resolver = MvccReadResolver::new(tracker, storage);

        let row_id = row();
        let candidates = vec![ReadResult {
            row_id,
            value: Some(Bytes::from_static(b"v1")),
            tx_id: None,
            commit_timestamp: Some(HybridTimestamp::new(5, 0)),
            newest_commit_timestamp: None,
            commit_table_id: None,
            commit_partition_id: None,
            schema_version: 1,
        }];

        let value = resolver.resolve(row_id, candidates, HybridTimestamp::new(10, 0), None).await.unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"v1")));
    }

    #[async_std::test]
    async fn reading_own_writes_sees_the_intent_directly() {
        let tracker = Arc::new(TransactionStateTracker::new());
        let storage = Arc::new(FakeRowStorage::new());
        let resolver = MvccReadResolver::new(tracker, storage);

        let row_id = row();
        let writer = tx(1);
        let candidates = vec![ReadResult {
            row_id,
            value: Some(Bytes::from_static(b"pending")),
            tx_id: Some(writer),
            commit_timestamp: None,
            newest_commit_timestamp: None,
            commit_table_id: None,
            commit_partition_id: None,
            schema_version: 1,
        }];

        let value = resolver
            .resolve(row_id, candidates, HybridTimestamp::new(10, 0), Some(writer))
            .await
            .unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"pending")));
    }

    #[async_std::test]
    async fn committed_intent_visible_at_read_timestamp_is_returned() {
        let tracker = Arc::new(TransactionStateTracker::new());
        let writer = tx(2);
        tracker.record_result(writer, TransactionResult::Committed(HybridTimestamp::new(5, 0)));
        let storage = Arc::new(FakeRowStorage::new());
        let resolver = MvccReadResolver::new(tracker, storage);

        let row_id = row();
        let candidates = vec![ReadResult {
            row_id,
            value: Some(Bytes::from_static(b"v2")),
            tx_id: Some(writer),
            commit_timestamp: None,
            newest_commit_timestamp: None,
            commit_table_id: None,
            commit_partition_id: None,
            schema_version: 1,
        }];

        let value = resolver
            .resolve(row_id, candidates, HybridTimestamp::new(10, 0), None)
            .await
            .unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"v2")));
    }

    #[async_std::test]
    async fn aborted_intent_falls_back_to_committed_value() {
        let tracker = Arc::new(TransactionStateTracker::new());
        let writer = tx(3);
        tracker.record_result(writer, TransactionResult::Aborted);
        let storage = Arc::new(FakeRowStorage::new());
        let resolver = MvccReadResolver::new(tracker, storage);

        let row_id = row();
        let candidates = vec![
            ReadResult {
                row_id,
                value: Some(Bytes::from_static(b"old")),
                tx_id: None,
                commit_timestamp: Some(HybridTimestamp::new(1, 0)),
                newest_commit_timestamp: None,
                commit_table_id: None,
                commit_partition_id: None,
                schema_version: 1,
            },
            ReadResult {
                row_id,
                value: Some(Bytes::from_static(b"aborted-write")),
                tx_id: Some(writer),
                commit_timestamp: None,
                newest_commit_timestamp: None,
                commit_table_id: None,
                commit_partition_id: None,
                schema_version: 1,
            },
        ];

        let value = resolver
            .resolve(row_id, candidates, HybridTimestamp::new(10, 0), None)
            .await
            .unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"old")));
    }
}
