// Registry of live mission entities

use crate::config::ReplicationConfig;
use crate::error::MissionError;
use crate::mission::{MissionObject, ObjectId};
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};


/// Every mission currently in the world, by object id.
pub struct MissionRegistry {
    /// Lock-free concurrent map for fast lookups
    missions: DashMap<ObjectId, Arc<MissionObject>>,
    replication: ReplicationConfig,
}

impl MissionRegistry {
    pub fn new(replication: ReplicationConfig) -> Self {
        Self {
            missions: DashMap::new(),
            replication,
        }
    }

    /// Instantiate a mission from its template.
    pub fn create(
        &self,
        object_id: ObjectId,
        planet: &str,
        template: &str,
    ) -> Result<Arc<MissionObject>, MissionError> {
        let mission = MissionObject::new(object_id, planet, template)
            .with_reliable_deltas(self.replication.reliable_deltas);
        self.insert(mission)
    }

    /// Add an already built mission (e.g. one read from storage).
    pub fn insert(&self, mission: MissionObject) -> Result<Arc<MissionObject>, MissionError> {
        let object_id = mission.object_id();
        match self.missions.entry(object_id) {
            Entry::Occupied(_) => Err(MissionError::AlreadyExists(object_id)),
            Entry::Vacant(slot) => {
                let mission = Arc::new(mission);
                slot.insert(Arc::clone(&mission));
                info!(object_id = %object_id, "Mission added to world");
                Ok(mission)
            }
        }
    }

    pub fn get(&self, object_id: ObjectId) -> Option<Arc<MissionObject>> {
        self.missions.get(&object_id).map(|m| Arc::clone(m.value()))
    }

    /// Remove a mission from the world and destroy it.
    pub fn remove(&self, object_id: ObjectId) -> Option<Arc<MissionObject>> {
        let (_, mission) = self.missions.remove(&object_id)?;
        mission.destroy();
        Some(mission)
    }

    /// Ids of every live mission, sorted.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.missions.iter().map(|m| *m.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.missions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    /// Load every stored mission into the world.
    ///
    /// Records that cannot be restored (newer schema, duplicate id) are
    /// skipped with a warning. Returns the number loaded.
    pub fn load_from_store(&self, store: &SqliteStore) -> Result<usize> {
        let records = store
            .load_all_missions()
            .context("Failed to read stored missions")?;

        let mut loaded = 0;
        for record in records {
            let object_id = record.object_id;
            let restored = MissionObject::from_record(record)
                .map(|m| m.with_reliable_deltas(self.replication.reliable_deltas))
                .and_then(|m| self.insert(m));

            match restored {
                Ok(_) => loaded += 1,
                Err(e) => warn!(object_id = %object_id, error = %e, "Skipping stored mission"),
            }
        }

        info!(missions = loaded, "Loaded missions from store");
        Ok(loaded)
    }
}

impl Default for MissionRegistry {
    fn default() -> Self {
        Self::new(ReplicationConfig::default())
    }
}
