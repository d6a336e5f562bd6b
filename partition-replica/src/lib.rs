//! Partition Replica Coordinator: the per-`(table, partition)` component
//! that handles MVCC reads, 2PL writes, transaction finish/recovery, and
//! safe-time-ordered replication for one replication group (spec §1).
//!
//! [`listener::PartitionReplicaListener`] is the top-level entry point;
//! everything else in this crate is a collaborator it wires together.

#[macro_use]
extern crate common;

pub mod clock;
pub mod config;
pub mod error;
pub mod finish;
pub mod gatekeeper;
pub mod ids;
pub mod listener;
pub mod locks;
pub mod mvcc;
pub mod ports;
pub mod read_path;
pub mod replication;
pub mod request;
pub mod schema;
pub mod testing;
pub mod txn;
pub mod write_path;
