// Entity-scoped ownership of an open storage transaction

use crate::error::MissionError;
use crate::mission::ObjectId;
use crate::store::{StoreTransaction, TransactionalStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};


/// Identifier the store assigns to each transaction it opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

enum Slot {
    Idle,
    /// `begin` is talking to the store; other callers are turned away
    Opening,
    Bound(Box<dyn StoreTransaction>),
    /// The entity is gone; nothing can be bound again
    Closed,
}

/// Binds at most one storage transaction to an entity.
///
/// `Idle -> begin -> Opening -> Bound -> take -> Idle`. A second `begin`
/// while a transaction is opening or bound is rejected rather than replacing
/// the handle. Commit and rollback belong to whoever `take`s the handle.
/// `close` is final: a transaction that finishes opening after it is rolled
/// back instead of bound.
pub struct TransactionBinding {
    object_id: ObjectId,
    slot: Mutex<Slot>,
}

impl TransactionBinding {
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Open a transaction on `store` and bind it.
    ///
    /// The store call runs without holding the slot lock.
    pub fn begin(&self, store: &dyn TransactionalStore) -> Result<TxnId, MissionError> {
        {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Idle => *slot = Slot::Opening,
                Slot::Opening => {
                    return Err(MissionError::TransactionAlreadyBound {
                        object_id: self.object_id,
                        txn: None,
                    })
                }
                Slot::Bound(txn) => {
                    return Err(MissionError::TransactionAlreadyBound {
                        object_id: self.object_id,
                        txn: Some(txn.id()),
                    })
                }
                Slot::Closed => return Err(MissionError::Destroyed(self.object_id)),
            }
        }

        match store.begin_transaction() {
            Ok(txn) => {
                let id = txn.id();
                {
                    let mut slot = self.slot.lock();
                    if matches!(*slot, Slot::Opening) {
                        *slot = Slot::Bound(txn);
                        debug!(object_id = %self.object_id, txn = %id, "Transaction bound");
                        return Ok(id);
                    }
                }

                // Closed while the store was opening it
                if let Err(e) = txn.rollback() {
                    warn!(object_id = %self.object_id, txn = %id, error = %e, "Failed to roll back orphaned transaction");
                }
                Err(MissionError::Destroyed(self.object_id))
            }
            Err(e) => {
                let mut slot = self.slot.lock();
                if matches!(*slot, Slot::Opening) {
                    *slot = Slot::Idle;
                }
                Err(MissionError::Storage(e.context(format!(
                    "Failed to begin transaction for mission {}",
                    self.object_id
                ))))
            }
        }
    }

    /// Id of the bound transaction, if any.
    pub fn current(&self) -> Option<TxnId> {
        match &*self.slot.lock() {
            Slot::Bound(txn) => Some(txn.id()),
            _ => None,
        }
    }

    /// Hand the bound transaction to the caller and return to idle.
    ///
    /// Returns None when nothing is bound (including while opening).
    pub fn take(&self) -> Option<Box<dyn StoreTransaction>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Bound(txn) => {
                debug!(object_id = %self.object_id, txn = %txn.id(), "Transaction released");
                Some(txn)
            }
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Refuse all further transactions. Returns the bound one, if any, for
    /// the caller to roll back.
    pub fn close(&self) -> Option<Box<dyn StoreTransaction>> {
        match std::mem::replace(&mut *self.slot.lock(), Slot::Closed) {
            Slot::Bound(txn) => Some(txn),
            _ => None,
        }
    }
}
