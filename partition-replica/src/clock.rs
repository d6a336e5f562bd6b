//! Clock & Safe-Time Tracker (spec §2, §3 "Hybrid Timestamp" / "Safe Time",
//! §4.9).
//!
//! Two small, independent pieces: a hybrid logical clock that hands out
//! strictly-increasing `HybridTimestamp`s for `now()`, and a per-partition
//! safe-time watermark that readers wait on before serving a timestamped
//! read (§4.3 "Await safeTime ≥ readTimestamp").

use std::sync::Mutex as StdMutex;

use async_std::sync::{Condvar, Mutex as AsyncMutex};

use crate::ids::HybridTimestamp;

/// Hands out monotonically increasing [`HybridTimestamp`]s. Every call to
/// `now()` is guaranteed to return a value strictly greater than the
/// previous one returned by this instance, and advances to track the wall
/// clock when it runs ahead of the last handed-out timestamp (the standard
/// HLC update rule).
pub struct HybridClock {
    last: StdMutex<HybridTimestamp>,
}

impl HybridClock {
    pub fn new() -> Self {
        Self {
            last: StdMutex::new(HybridTimestamp::MIN),
        }
    }

    /// Builds a clock whose first `now()` will be at least `initial`, used
    /// when recovering a replica that must not regress timestamps it has
    /// already handed out before a restart.
    pub fn starting_at(initial: HybridTimestamp) -> Self {
        Self {
            last: StdMutex::new(initial),
        }
    }

    pub fn now(&self) -> HybridTimestamp {
        let physical = current_millis();
        let mut last = self.last.lock().unwrap();

        let next = if physical > last.physical {
            HybridTimestamp::new(physical, 0)
        } else {
            HybridTimestamp::new(last.physical, last.logical + 1)
        };

        *last = next;
        next
    }

    /// Folds in a timestamp observed from another replica or from a
    /// replicated command, ensuring this clock's future `now()` calls stay
    /// ahead of it (HLC message-receive rule).
    pub fn update(&self, observed: HybridTimestamp) {
        let physical = current_millis();
        let mut last = self.last.lock().unwrap();

        let candidate_physical = physical.max(last.physical).max(observed.physical);
        let candidate = if candidate_physical == observed.physical && candidate_physical == last.physical {
            HybridTimestamp::new(candidate_physical, last.logical.max(observed.logical) + 1)
        } else if candidate_physical == observed.physical {
            HybridTimestamp::new(candidate_physical, observed.logical + 1)
        } else if candidate_physical == last.physical {
            HybridTimestamp::new(candidate_physical, last.logical + 1)
        } else {
            HybridTimestamp::new(candidate_physical, 0)
        };

        if candidate > *last {
            *last = candidate;
        }
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(test))]
fn current_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
fn current_millis() -> u64 {
    // Tests drive the clock entirely through `update()`/explicit
    // timestamps; pinning the wall-clock component to 0 keeps assertions on
    // exact `HybridTimestamp` values deterministic.
    0
}

/// Monotone per-partition watermark (§3 "Safe Time"): a read at `t` may be
/// served once `safeTime >= t` (§4.3). Advancing the watermark wakes every
/// waiter whose threshold has now been reached.
pub struct SafeTimeTracker {
    current: AsyncMutex<HybridTimestamp>,
    waiters: Condvar,
}

impl SafeTimeTracker {
    pub fn new() -> Self {
        Self {
            current: AsyncMutex::new(HybridTimestamp::MIN),
            waiters: Condvar::new(),
        }
    }

    pub async fn current(&self) -> HybridTimestamp {
        *self.current.lock().await
    }

    /// Advances the watermark to `new_value`, or does nothing if it is not
    /// ahead of the current value (§3 invariant #3: "Safe time is monotone
    /// per partition").
    pub async fn advance(&self, new_value: HybridTimestamp) {
        let mut guard = self.current.lock().await;
        if new_value > *guard {
            *guard = new_value;
            self.waiters.notify_all();
        }
    }

    /// Blocks until the watermark reaches at least `threshold`.
    pub async fn wait_until(&self, threshold: HybridTimestamp) {
        let mut guard = self.current.lock().await;
        while *guard < threshold {
            guard = self.waiters.wait(guard).await;
        }
    }
}

impl Default for SafeTimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotone() {
        let clock = HybridClock::new();
        let mut prev = clock.now();
        for _ in 0..100 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn clock_update_advances_past_observed() {
        let clock = HybridClock::new();
        let observed = HybridTimestamp::new(1_000_000, 5);
        clock.update(observed);
        assert!(clock.now() > observed);
    }

    #[async_std::test]
    async fn safe_time_wait_until_unblocks_on_advance() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let tracker = Arc::new(SafeTimeTracker::new());
        let target = HybridTimestamp::new(10, 0);
        let reached = Arc::new(AtomicBool::new(false));

        let waiter = {
            let tracker = tracker.clone();
            let reached = reached.clone();
            async_std::task::spawn(async move {
                tracker.wait_until(target).await;
                reached.store(true, Ordering::SeqCst);
            })
        };

        tracker.advance(HybridTimestamp::new(5, 0)).await;
        async_std::task::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!reached.load(Ordering::SeqCst));

        tracker.advance(target).await;
        waiter.await;
        assert!(reached.load(Ordering::SeqCst));
    }

    #[async_std::test]
    async fn safe_time_never_regresses() {
        let tracker = SafeTimeTracker::new();
        tracker.advance(HybridTimestamp::new(10, 0)).await;
        tracker.advance(HybridTimestamp::new(5, 0)).await;
        assert_eq!(tracker.current().await, HybridTimestamp::new(10, 0));
    }
}
