//! Scan cursor (§4.3 "RW scan", "RO scan"): paginates a key range across
//! repeated batch-sized calls, re-locking as it goes for RW scans.

use std::ops::Bound;

use common::bytes::Bytes;

/// Resumable state for a single scan, held by the caller (not the
/// coordinator) between batches.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    lower: Bound<Bytes>,
    upper: Bound<Bytes>,
    batch_size: usize,
    exhausted: bool,
}

impl ScanCursor {
    pub fn new(lower: Bound<Bytes>, upper: Bound<Bytes>, batch_size: usize) -> Self {
        Self {
            lower,
            upper,
            batch_size,
            exhausted: false,
        }
    }

    pub fn lower(&self) -> Bound<Bytes> {
        self.lower.clone()
    }

    pub fn upper(&self) -> Bound<Bytes> {
        self.upper.clone()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Resumes the scan strictly after `key`, the last row returned by the
    /// previous batch.
    pub fn resume_after(&mut self, key: Bytes) {
        self.lower = Bound::Excluded(key);
    }

    /// Marks the scan done because the underlying storage engine returned
    /// fewer rows than `batch_size`, or the cursor's upper bound was
    /// reached (checked after locking the boundary row, §4.3).
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    /// Whether `key` falls past this cursor's upper bound. Callers lock the
    /// candidate row *before* calling this, so a row just past the edge is
    /// still locked and thus still conflicts with a concurrent insert into
    /// the gap (§4.3 "Upper-bound is checked after the lock is granted").
    pub fn past_upper_bound(&self, key: &Bytes) -> bool {
        match &self.upper {
            Bound::Unbounded => false,
            Bound::Included(k) => key > k,
            Bound::Excluded(k) => key >= k,
        }
    }
}
