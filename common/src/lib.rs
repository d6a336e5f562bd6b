//! Small ambient-stack crate shared by the replica coordinator.
//!
//! Mirrors the role `common` plays in the source tree this was grown
//! from: a single place for the error type, a couple of generic
//! async helpers, and re-exports of the handful of third-party crates
//! everything else is built on, so every other crate just writes
//! `common::errors::*` instead of importing `failure`/`async-std`
//! directly.

#[macro_use]
pub extern crate failure;
pub extern crate async_std;
pub extern crate bytes;
pub extern crate chrono;
pub extern crate uuid;
pub use async_trait::async_trait;

pub mod bundle;
pub mod errors;
