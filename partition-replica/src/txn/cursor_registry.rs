//! Cursor Registry (spec §2, §3 "Cursor", §4.3, §4.6 step 1).
//!
//! Scan cursors are created lazily on the first batch request for a given
//! `(txId, scanId)` and destroyed on explicit close, on the owning
//! transaction's write-intent switch, or after sitting idle past
//! [`crate::config::CoordinatorConfig::cursor_idle_timeout`]
//! (SPEC_FULL.md §4 "cursor idle expiry").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_std::sync::Mutex as AsyncMutex;

use crate::ids::TransactionId;
use crate::txn::cursor::ScanCursor;

struct CursorEntry {
    cursor: ScanCursor,
    last_touched: Instant,
}

pub struct CursorRegistry {
    cursors: AsyncMutex<HashMap<(TransactionId, u64), CursorEntry>>,
    idle_timeout: Duration,
}

impl CursorRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            cursors: AsyncMutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Registers a newly opened cursor, or replaces one already registered
    /// under the same key.
    pub async fn open(&self, tx_id: TransactionId, scan_id: u64, cursor: ScanCursor) {
        self.cursors.lock().await.insert(
            (tx_id, scan_id),
            CursorEntry {
                cursor,
                last_touched: Instant::now(),
            },
        );
    }

    /// Fetches a previously registered cursor for a follow-up batch,
    /// refreshing its idle clock.
    pub async fn get(&self, tx_id: TransactionId, scan_id: u64) -> Option<ScanCursor> {
        let mut guard = self.cursors.lock().await;
        let entry = guard.get_mut(&(tx_id, scan_id))?;
        entry.last_touched = Instant::now();
        Some(entry.cursor.clone())
    }

    /// Persists advanced cursor state after a batch (new lower bound,
    /// exhausted flag), refreshing its idle clock.
    pub async fn store(&self, tx_id: TransactionId, scan_id: u64, cursor: ScanCursor) {
        self.cursors.lock().await.insert(
            (tx_id, scan_id),
            CursorEntry {
                cursor,
                last_touched: Instant::now(),
            },
        );
    }

    /// `SCAN_CLOSE` (§6): drops one cursor.
    pub async fn close(&self, tx_id: TransactionId, scan_id: u64) {
        self.cursors.lock().await.remove(&(tx_id, scan_id));
    }

    /// §4.6 step 1 "Close all cursors registered for txId", run as the
    /// first step of write-intent switch.
    pub async fn close_tx(&self, tx_id: TransactionId) {
        self.cursors.lock().await.retain(|(tx, _), _| *tx != tx_id);
    }

    /// Drops every cursor that has sat idle past `cursor_idle_timeout`.
    /// Callers run this periodically (e.g. from a background sweep task);
    /// it is not invoked from the request path itself.
    pub async fn evict_idle(&self) {
        let timeout = self.idle_timeout;
        self.cursors.lock().await.retain(|_, entry| entry.last_touched.elapsed() < timeout);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.cursors.lock().await.len()
    }
}
