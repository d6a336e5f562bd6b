//! Core identifiers and the hybrid timestamp, per spec §3 "Data Model".

use std::cmp::Ordering;
use std::fmt;

use uuid::Uuid;

/// `(tableId, partitionId)`. Immutable for the lifetime of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicationGroupId {
    pub table_id: u32,
    pub partition_id: u32,
}

impl ReplicationGroupId {
    pub fn new(table_id: u32, partition_id: u32) -> Self {
        Self {
            table_id,
            partition_id,
        }
    }
}

impl fmt::Display for ReplicationGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.partition_id)
    }
}

/// Stable identifier of a physical row slot in MVCC storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub partition_id: u32,
    pub uuid: Uuid,
}

impl RowId {
    pub fn new(partition_id: u32, uuid: Uuid) -> Self {
        Self { partition_id, uuid }
    }

    pub fn generate(partition_id: u32) -> Self {
        Self {
            partition_id,
            uuid: Uuid::new_v4(),
        }
    }
}

/// 64-bit `(physical, logical)` hybrid-logical-clock timestamp with a total
/// order: `physical` is compared first, `logical` breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HybridTimestamp {
    pub physical: u64,
    pub logical: u32,
}

impl HybridTimestamp {
    pub const MIN: HybridTimestamp = HybridTimestamp {
        physical: 0,
        logical: 0,
    };

    pub fn new(physical: u64, logical: u32) -> Self {
        Self { physical, logical }
    }

    /// Encodes this timestamp into the high 64 bits of a `TransactionId`, per
    /// §3: "Transaction Id: 128-bit id whose high bits encode begin-timestamp
    /// (extractable)".
    fn pack(&self) -> u64 {
        (self.physical << 16) | (self.logical as u64 & 0xFFFF)
    }

    fn unpack(bits: u64) -> Self {
        Self {
            physical: bits >> 16,
            logical: (bits & 0xFFFF) as u32,
        }
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.physical
            .cmp(&other.physical)
            .then(self.logical.cmp(&other.logical))
    }
}

/// 128-bit transaction id. The high 64 bits are the transaction's begin
/// timestamp (extractable via `begin_timestamp()`); the low 64 bits
/// disambiguate transactions that begin at the same hybrid timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u128);

impl TransactionId {
    pub fn new(begin_timestamp: HybridTimestamp, disambiguator: u64) -> Self {
        let high = begin_timestamp.pack() as u128;
        Self((high << 64) | disambiguator as u128)
    }

    pub fn from_raw(value: u128) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn begin_timestamp(&self) -> HybridTimestamp {
        HybridTimestamp::unpack((self.0 >> 64) as u64)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
