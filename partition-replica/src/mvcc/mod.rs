//! MVCC read path: resolving the value visible to a reader out of a row
//! slot's committed version plus at most one pending write intent (§3, §4.3,
//! §4.8).

mod read_result;
mod resolver;

pub use read_result::ReadResult;
pub use resolver::MvccReadResolver;
