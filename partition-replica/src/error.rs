//! Error taxonomy for the coordinator, per spec §7 "Error Handling Design".

use common::errors::Error as CommonError;

use crate::ids::{ReplicationGroupId, TransactionId};
use crate::txn::state::TransactionResult;

#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum CoordinatorError {
    #[fail(
        display = "primary replica miss on {}: leaseholder={}, expected_token={:?}, actual_token={:?}",
        local_name, leaseholder, expected_token, actual_token
    )]
    PrimaryReplicaMiss {
        local_name: String,
        leaseholder: String,
        expected_token: u64,
        actual_token: Option<u64>,
    },

    #[fail(display = "table not found at timestamp")]
    TableNotFound,

    #[fail(display = "request schema version is incompatible with the table schema")]
    IncompatibleSchema,

    /// Raised after a commit has been finalized as an abort because forward
    /// schema validation failed at commit time (§4.5 step 1).
    #[fail(display = "transaction {} aborted: incompatible schema at commit", _0)]
    IncompatibleSchemaAbort(TransactionId),

    #[fail(
        display = "transaction {} already finished with outcome {:?}",
        _0, _1
    )]
    TransactionAlreadyFinished(TransactionId, TransactionResult),

    #[fail(display = "replication command timed out")]
    ReplicationTimeout,

    /// A submitted command's stamped safe time landed behind one already
    /// applied on this group; the dispatcher retries with a fresh stamp
    /// (§4.4 step 5, §4.9).
    #[fail(display = "command safe time was reordered behind an already-applied command")]
    SafeTimeReorder,

    #[fail(display = "exceeded max retries on safe-time reorder")]
    ReplicationMaxRetriesExceeded,

    #[fail(display = "unsupported replica request kind: {}", _0)]
    UnsupportedReplicaRequest(String),

    #[fail(display = "node is stopping")]
    NodeStopping,

    #[fail(display = "replication error on group {}: {}", group_id, message)]
    ReplicationException {
        group_id: ReplicationGroupId,
        message: String,
    },

    /// Transaction attempted an operation after aborting due to an
    /// unexpected state transition observed on a concurrent apply, e.g. a
    /// racing recovery (§4.5 step 3).
    #[fail(display = "unexpected transaction state for {}: {}", _0, _1)]
    UnexpectedTransactionState(TransactionId, String),

    #[fail(display = "invalid request: {}", _0)]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl From<CoordinatorError> for CommonError {
    fn from(e: CoordinatorError) -> Self {
        common::errors::err_msg(e.to_string())
    }
}
