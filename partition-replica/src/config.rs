//! Embedder-supplied configuration (SPEC_FULL.md §2 "Ambient stack /
//! Configuration"). No global statics and no file parsing here — the
//! embedding process owns that and passes a `CoordinatorConfig` into
//! [`crate::listener::PartitionReplicaListener::new`].

use std::time::Duration;

/// Bound on `locksForScan`/`MAX_RETRIES_ON_SAFE_TIME_REORDERING`-style
/// tunables the distilled spec leaves as unnamed constants (§4.4 step 5,
/// SPEC_FULL.md §4 "batch size default and bound", "cursor idle expiry").
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Default `batchSize` used when a scan request omits one.
    pub default_batch_size: usize,
    /// Upper bound a requested `batchSize` is clamped to.
    pub max_batch_size: usize,
    /// How long an idle, unclosed scan cursor is kept before being dropped.
    pub cursor_idle_timeout: Duration,
    /// Bound on safe-time-reorder retries for a single replicated command
    /// submission (§4.4 step 5 `MAX_RETRIES_ON_SAFE_TIME_REORDERING`).
    pub max_retries_on_safe_time_reordering: u32,
    /// Poll attempts/interval used while waiting for an orphan-recovery
    /// rollback-finish to converge (§4.7).
    pub recovery_poll_attempts: u32,
    pub recovery_poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 1024,
            max_batch_size: 10_000,
            cursor_idle_timeout: Duration::from_secs(60),
            max_retries_on_safe_time_reordering: 10,
            recovery_poll_attempts: 10,
            recovery_poll_interval: Duration::from_millis(20),
        }
    }
}

impl CoordinatorConfig {
    /// Clamps a client-requested batch size into `[1, max_batch_size]`,
    /// falling back to `default_batch_size` when the client didn't ask for
    /// one.
    pub fn resolve_batch_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_batch_size).clamp(1, self.max_batch_size)
    }
}
