//! In-process stand-ins for every out-of-scope collaborator in
//! [`crate::ports`] (SPEC_FULL.md §2 "Test tooling"), mirroring the
//! reference crate's `TestMetastore` pattern: a real implementation of
//! each port trait backed by a `HashMap`/`BTreeMap` instead of Raft/LSM/a
//! lock service, so the coordinator's own logic can be exercised without a
//! real cluster.

#[cfg(test)]
pub mod fakes;
