use crate::codec::MissionField;
use crate::mission::ObjectId;
use crate::txn::TxnId;
use thiserror::Error;

/// Errors surfaced to callers of mission operations.
///
/// Every variant except `Storage` is an invariant violation: the operation
/// is refused and the entity is left untouched.
#[derive(Debug, Error)]
pub enum MissionError {
    /// The mission was removed from the world; it accepts no further work.
    #[error("mission {0} has been destroyed")]
    Destroyed(ObjectId),

    /// `begin` was called while a transaction is bound (or being opened).
    #[error("mission {object_id} already has transaction {txn:?} bound")]
    TransactionAlreadyBound {
        object_id: ObjectId,
        txn: Option<TxnId>,
    },

    /// A save was requested without a bound transaction.
    #[error("mission {0} has no bound transaction")]
    NoTransactionBound(ObjectId),

    /// A mission with this id is already registered in the world.
    #[error("mission {0} already exists")]
    AlreadyExists(ObjectId),

    /// A persisted record was written by a newer schema than this build knows.
    #[error("mission {object_id} record has schema version {found}, newest supported is {supported}")]
    UnsupportedSchemaVersion {
        object_id: ObjectId,
        found: u16,
        supported: u16,
    },

    /// A string value is too long for its wire encoding; nothing was changed.
    #[error("mission {object_id} {field:?} value is {len} bytes, longer than the wire allows")]
    ValueTooLong {
        object_id: ObjectId,
        field: MissionField,
        len: usize,
    },

    /// The storage collaborator failed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
