//! Durable storage collaborator for mission entities.
//!
//! The core only needs two things from storage: a way to open a transaction
//! ([`TransactionalStore`]) and a transaction that accepts mission records
//! and can be committed or rolled back ([`StoreTransaction`]).
//!
//! ```text
//! MissionObject::begin_transaction(store)   -> TxnId bound to the entity
//! save_bound(mission)                        -> record written, committed
//! ```
//!
//! [`SqliteStore`] is the production implementation.

use crate::error::MissionError;
use crate::mission::{MissionAttributes, MissionObject, ObjectId};
use crate::txn::TxnId;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod sqlite;


pub use sqlite::{SqliteStore, SqliteTransaction};

/// Opens transactions against a durable store.
pub trait TransactionalStore: Send + Sync {
    fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// One open storage transaction.
///
/// Dropping an unfinished transaction rolls it back.
pub trait StoreTransaction: Send {
    fn id(&self) -> TxnId;

    /// Insert or replace the record for `record.object_id`.
    fn put_mission(&mut self, record: &MissionRecord) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Persisted form of a mission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub object_id: ObjectId,
    pub planet: String,
    pub template: String,
    /// Entity schema version the record was written with
    pub schema_version: u16,
    pub attributes: MissionAttributes,
    pub saved_at: DateTime<Utc>,
}

/// Write the mission's state through its bound transaction and commit.
///
/// The transaction is taken off the entity first, so the entity is idle
/// again whether the save succeeds or not.
pub fn save_bound(mission: &MissionObject) -> Result<(), MissionError> {
    let object_id = mission.object_id();
    let mut txn = mission
        .take_transaction()
        .ok_or(MissionError::NoTransactionBound(object_id))?;
    let txn_id = txn.id();

    let written = mission
        .to_record()
        .and_then(|record| txn.put_mission(&record).map_err(MissionError::from));

    if let Err(e) = written {
        if let Err(rollback_err) = txn.rollback() {
            warn!(
                object_id = %object_id,
                txn = %txn_id,
                error = %rollback_err,
                "Failed to roll back mission transaction"
            );
        }
        return Err(e);
    }

    txn.commit()?;
    info!(object_id = %object_id, txn = %txn_id, "Mission saved");
    Ok(())
}

/// Begin a transaction on `store`, save the mission and commit.
pub fn persist_mission(
    mission: &MissionObject,
    store: &dyn TransactionalStore,
) -> Result<TxnId, MissionError> {
    let txn_id = mission.begin_transaction(store)?;
    save_bound(mission)?;
    Ok(txn_id)
}
