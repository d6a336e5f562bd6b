//! Replicated command submission: the command catalog (§4.4, §4.5, §4.6,
//! §4.7) plus the safe-time-ordered dispatcher every write path funnels
//! through (§4.9).

pub mod commands;
mod dispatcher;

pub use dispatcher::ReplicationDispatcher;
