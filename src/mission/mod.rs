//! Mission entity: replicated attribute store.
//!
//! All attributes of one mission live behind a single state lock. A mutator
//! holds it only long enough to swap the value and bump the update sequence;
//! the delta is encoded and broadcast after it is released.
//!
//! A second, outer delivery lock orders outbound traffic: deltas leave in
//! sequence order, and a new observer's baselines leave before any delta
//! newer than them.
//!
//! ```text
//! set_*()     ──delivery──▶ state: apply + sequence++ ──▶ DeltaEncoder ──▶ broadcast
//! subscribe() ──delivery──▶ state: register + snapshot ──▶ BaselineEncoder ──▶ endpoint
//! ```

mod attributes;

#[cfg(test)]
mod tests;

pub use attributes::{Location, MissionAttributes, ObjectId, StfText, WaypointObject};

use crate::codec::{BaselineEncoder, DeltaEncoder, MissionDelta, MISSION_SCHEMA_VERSION};
use crate::error::MissionError;
use crate::observer::{
    BroadcastReport, ClientChannel, Delivery, EndpointId, ObserverBroadcaster, OutboundMessage,
};
use crate::store::{MissionRecord, StoreTransaction, TransactionalStore};
use crate::txn::{TransactionBinding, TxnId};
use chrono::Utc;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct MissionState {
    attributes: MissionAttributes,
    /// Bumped by every mutation; carried by deltas and baselines
    sequence: u32,
    destroyed: bool,
}

/// A mission entity in the world.
pub struct MissionObject {
    object_id: ObjectId,
    planet: String,
    template: String,
    reliable_deltas: bool,
    /// Taken before `state`, held until the message is handed to channels
    delivery: Mutex<()>,
    state: Mutex<MissionState>,
    observers: ObserverBroadcaster,
    transaction: TransactionBinding,
    deltas: DeltaEncoder,
    baselines: BaselineEncoder,
}

impl MissionObject {
    /// Create a mission from its object template.
    pub fn new(object_id: ObjectId, planet: impl Into<String>, template: impl Into<String>) -> Self {
        Self::with_attributes(object_id, planet.into(), template.into(), MissionAttributes::default())
    }

    fn with_attributes(
        object_id: ObjectId,
        planet: String,
        template: String,
        attributes: MissionAttributes,
    ) -> Self {
        Self {
            object_id,
            planet,
            template,
            reliable_deltas: false,
            delivery: Mutex::new(()),
            state: Mutex::new(MissionState {
                attributes,
                sequence: 0,
                destroyed: false,
            }),
            observers: ObserverBroadcaster::new(),
            transaction: TransactionBinding::new(object_id),
            deltas: DeltaEncoder::default(),
            baselines: BaselineEncoder::default(),
        }
    }

    /// Rebuild a mission from a stored record.
    ///
    /// Records from older schema versions load as-is (version 0 is the
    /// only layout so far); records from a newer build are refused.
    pub fn from_record(record: MissionRecord) -> Result<Self, MissionError> {
        if record.schema_version > MISSION_SCHEMA_VERSION {
            return Err(MissionError::UnsupportedSchemaVersion {
                object_id: record.object_id,
                found: record.schema_version,
                supported: MISSION_SCHEMA_VERSION,
            });
        }

        Ok(Self::with_attributes(
            record.object_id,
            record.planet,
            record.template,
            record.attributes,
        ))
    }

    /// Send deltas on the reliable channel instead of fire-and-forget.
    pub fn with_reliable_deltas(mut self, reliable: bool) -> Self {
        self.reliable_deltas = reliable;
        self
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn planet(&self) -> &str {
        &self.planet
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Current update sequence.
    pub fn sequence(&self) -> u32 {
        self.state.lock().sequence
    }

    /// Consistent copy of every attribute.
    pub fn attributes(&self) -> MissionAttributes {
        self.state.lock().attributes.clone()
    }

    fn read<R>(&self, f: impl FnOnce(&MissionAttributes) -> R) -> R {
        f(&self.state.lock().attributes)
    }

    /// Apply a change under the state lock, then broadcast `delta` outside it.
    ///
    /// `change` must store the same value `delta` carries.
    fn mutate<R>(
        &self,
        delta: MissionDelta,
        change: impl FnOnce(&mut MissionAttributes) -> R,
    ) -> Result<R, MissionError> {
        if let Some(len) = delta.oversized_len() {
            return Err(MissionError::ValueTooLong {
                object_id: self.object_id,
                field: delta.field(),
                len,
            });
        }

        let _delivery = self.delivery.lock();
        let (previous, sequence) = {
            let mut state = self.state.lock();
            if state.destroyed {
                return Err(MissionError::Destroyed(self.object_id));
            }
            let previous = change(&mut state.attributes);
            state.sequence = state.sequence.wrapping_add(1);
            (previous, state.sequence)
        };

        self.notify_observers(sequence, &delta);
        Ok(previous)
    }

    fn notify_observers(&self, sequence: u32, delta: &MissionDelta) -> BroadcastReport {
        let bytes = self.deltas.encode(self.object_id, sequence, delta);
        let report = self
            .observers
            .broadcast(OutboundMessage::new(bytes, self.reliable_deltas));

        debug!(
            object_id = %self.object_id,
            field = ?delta.field(),
            sequence = sequence,
            delivered = report.delivered,
            "Delta sent"
        );

        report
    }

    // ── Start location ──────────────────────────────────────────────────────

    pub fn mission_start_x(&self) -> f32 {
        self.read(|a| a.start.x)
    }

    pub fn mission_start_y(&self) -> f32 {
        self.read(|a| a.start.y)
    }

    pub fn mission_start_z(&self) -> f32 {
        self.read(|a| a.start.z)
    }

    pub fn mission_start_planet(&self) -> String {
        self.read(|a| a.start.planet.clone())
    }

    /// Returns the previous start location.
    pub fn set_mission_start(
        &self,
        x: f32,
        y: f32,
        z: f32,
        planet: impl Into<String>,
    ) -> Result<Location, MissionError> {
        let location = Location::new(x, y, z, planet);
        self.mutate(MissionDelta::Start(location.clone()), |a| {
            mem::replace(&mut a.start, location)
        })
    }

    // ── Destination ─────────────────────────────────────────────────────────

    pub fn mission_destination_x(&self) -> f32 {
        self.read(|a| a.destination.x)
    }

    pub fn mission_destination_y(&self) -> f32 {
        self.read(|a| a.destination.y)
    }

    pub fn mission_destination_z(&self) -> f32 {
        self.read(|a| a.destination.z)
    }

    pub fn mission_destination_planet(&self) -> String {
        self.read(|a| a.destination.planet.clone())
    }

    /// Returns the previous destination.
    ///
    /// Position and planet are stored and replicated together.
    pub fn set_mission_destination(
        &self,
        x: f32,
        y: f32,
        z: f32,
        planet: impl Into<String>,
    ) -> Result<Location, MissionError> {
        let location = Location::new(x, y, z, planet);
        self.mutate(MissionDelta::Destination(location.clone()), |a| {
            mem::replace(&mut a.destination, location)
        })
    }

    // ── Scalars ─────────────────────────────────────────────────────────────

    pub fn mission_level(&self) -> i32 {
        self.read(|a| a.difficulty_level)
    }

    pub fn set_mission_level(&self, level: i32) -> Result<i32, MissionError> {
        self.mutate(MissionDelta::DifficultyLevel(level), |a| {
            mem::replace(&mut a.difficulty_level, level)
        })
    }

    pub fn mission_repeat_counter(&self) -> i32 {
        self.read(|a| a.repeat_count)
    }

    pub fn set_repeat_count(&self, count: i32) -> Result<i32, MissionError> {
        self.mutate(MissionDelta::RepeatCount(count), |a| {
            mem::replace(&mut a.repeat_count, count)
        })
    }

    pub fn credit_reward(&self) -> i32 {
        self.read(|a| a.credit_reward)
    }

    pub fn set_credit_reward(&self, credits: i32) -> Result<i32, MissionError> {
        self.mutate(MissionDelta::CreditReward(credits), |a| {
            mem::replace(&mut a.credit_reward, credits)
        })
    }

    // ── Strings ─────────────────────────────────────────────────────────────

    pub fn mission_creator(&self) -> String {
        self.read(|a| a.creator.clone())
    }

    pub fn set_mission_creator(&self, creator: impl Into<String>) -> Result<String, MissionError> {
        let creator = creator.into();
        self.mutate(MissionDelta::Creator(creator.clone()), |a| {
            mem::replace(&mut a.creator, creator)
        })
    }

    pub fn mission_description(&self) -> String {
        self.read(|a| a.description.text.clone())
    }

    pub fn mission_description_id(&self) -> String {
        self.read(|a| a.description.id.clone())
    }

    /// Sets the description text and its string table id together.
    pub fn set_mission_description(
        &self,
        text: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<StfText, MissionError> {
        let description = StfText::new(text, id);
        self.mutate(MissionDelta::Description(description.clone()), |a| {
            mem::replace(&mut a.description, description)
        })
    }

    pub fn mission_title(&self) -> String {
        self.read(|a| a.title.text.clone())
    }

    pub fn mission_title_id(&self) -> String {
        self.read(|a| a.title.id.clone())
    }

    /// Sets the title text and its string table id together.
    pub fn set_mission_title(
        &self,
        text: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<StfText, MissionError> {
        let title = StfText::new(text, id);
        self.mutate(MissionDelta::Title(title.clone()), |a| {
            mem::replace(&mut a.title, title)
        })
    }

    pub fn mission_target_name(&self) -> String {
        self.read(|a| a.target_name.clone())
    }

    pub fn set_mission_target_name(
        &self,
        name: impl Into<String>,
    ) -> Result<String, MissionError> {
        let name = name.into();
        self.mutate(MissionDelta::TargetName(name.clone()), |a| {
            mem::replace(&mut a.target_name, name)
        })
    }

    pub fn mission_template_object(&self) -> String {
        self.read(|a| a.target_template.clone())
    }

    pub fn set_mission_template_object(
        &self,
        template: impl Into<String>,
    ) -> Result<String, MissionError> {
        let template = template.into();
        self.mutate(MissionDelta::TargetTemplate(template.clone()), |a| {
            mem::replace(&mut a.target_template, template)
        })
    }

    pub fn mission_type(&self) -> String {
        self.read(|a| a.mission_type.clone())
    }

    pub fn set_mission_type(&self, mission_type: impl Into<String>) -> Result<String, MissionError> {
        let mission_type = mission_type.into();
        self.mutate(MissionDelta::MissionType(mission_type.clone()), |a| {
            mem::replace(&mut a.mission_type, mission_type)
        })
    }

    // ── References ──────────────────────────────────────────────────────────

    pub fn attached_waypoint(&self) -> Option<Arc<WaypointObject>> {
        self.read(|a| a.attached_waypoint.clone())
    }

    pub fn set_attached_waypoint(
        &self,
        waypoint: Option<Arc<WaypointObject>>,
    ) -> Result<Option<Arc<WaypointObject>>, MissionError> {
        self.mutate(MissionDelta::AttachedWaypoint(waypoint.clone()), |a| {
            mem::replace(&mut a.attached_waypoint, waypoint)
        })
    }

    // ── Baselines and observers ─────────────────────────────────────────────

    /// Encode every baseline segment from one consistent snapshot.
    pub fn baselines(&self) -> Result<Vec<Vec<u8>>, MissionError> {
        let (attributes, sequence) = {
            let state = self.state.lock();
            if state.destroyed {
                return Err(MissionError::Destroyed(self.object_id));
            }
            (state.attributes.clone(), state.sequence)
        };

        Ok(self.encode_baselines(sequence, &attributes))
    }

    fn encode_baselines(&self, sequence: u32, attributes: &MissionAttributes) -> Vec<Vec<u8>> {
        self.baselines
            .encode_segments(self.object_id, sequence, attributes)
    }

    /// Send the baselines to one client channel.
    ///
    /// A missing or closed channel is logged and skipped. Returns the
    /// number of segments written.
    pub fn send_baselines(&self, channel: &dyn ClientChannel) -> Result<usize, MissionError> {
        let _delivery = self.delivery.lock();
        let segments = self.baselines()?;

        if !channel.is_open() {
            warn!(object_id = %self.object_id, "No open client channel, baselines not sent");
            return Ok(0);
        }

        let mut written = 0;
        for segment in segments {
            if let Err(e) = channel.write(OutboundMessage::new(segment, true)) {
                warn!(object_id = %self.object_id, error = %e, "Failed to send baseline");
                break;
            }
            written += 1;
        }

        Ok(written)
    }

    /// Start observing this mission: register the endpoint and send it the
    /// baselines.
    ///
    /// Registration and snapshot happen under one state lock, and the
    /// baselines are written before the delivery lock is released. The
    /// endpoint therefore sees its baselines first, followed only by deltas
    /// with a newer sequence.
    pub fn subscribe(
        &self,
        endpoint: EndpointId,
        channel: &Arc<dyn ClientChannel>,
    ) -> Result<(), MissionError> {
        let _delivery = self.delivery.lock();
        let (attributes, sequence) = {
            let state = self.state.lock();
            if state.destroyed {
                return Err(MissionError::Destroyed(self.object_id));
            }
            self.observers.subscribe(endpoint, channel);
            (state.attributes.clone(), state.sequence)
        };

        for segment in self.encode_baselines(sequence, &attributes) {
            match self
                .observers
                .send_to(&endpoint, OutboundMessage::new(segment, true))
            {
                Delivery::Delivered => {}
                outcome => {
                    warn!(
                        object_id = %self.object_id,
                        endpoint = %endpoint,
                        outcome = ?outcome,
                        "Baseline not delivered"
                    );
                    break;
                }
            }
        }

        info!(object_id = %self.object_id, endpoint = %endpoint, sequence = sequence, "Observer subscribed");
        Ok(())
    }

    /// Register an endpoint for deltas only. Returns the current sequence:
    /// the endpoint receives every delta after it.
    pub fn add_observer(
        &self,
        endpoint: EndpointId,
        channel: &Arc<dyn ClientChannel>,
    ) -> Result<u32, MissionError> {
        let _delivery = self.delivery.lock();
        let state = self.state.lock();
        if state.destroyed {
            return Err(MissionError::Destroyed(self.object_id));
        }
        self.observers.subscribe(endpoint, channel);
        Ok(state.sequence)
    }

    pub fn unsubscribe(&self, endpoint: &EndpointId) -> bool {
        let removed = self.observers.unsubscribe(endpoint);
        if removed {
            info!(object_id = %self.object_id, endpoint = %endpoint, "Observer unsubscribed");
        }
        removed
    }

    pub fn is_observed_by(&self, endpoint: &EndpointId) -> bool {
        self.observers.is_subscribed(endpoint)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.subscriber_count()
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// Open a storage transaction and bind it to this mission.
    ///
    /// A mission destroyed while the store is opening the transaction gets
    /// `Destroyed`, and the new transaction is rolled back.
    pub fn begin_transaction(&self, store: &dyn TransactionalStore) -> Result<TxnId, MissionError> {
        if self.is_destroyed() {
            return Err(MissionError::Destroyed(self.object_id));
        }
        self.transaction.begin(store)
    }

    /// Id of the bound transaction, if any.
    pub fn transaction(&self) -> Option<TxnId> {
        self.transaction.current()
    }

    /// Release the bound transaction to the persistence layer.
    pub fn take_transaction(&self) -> Option<Box<dyn StoreTransaction>> {
        self.transaction.take()
    }

    /// Snapshot this mission as a storable record.
    pub fn to_record(&self) -> Result<MissionRecord, MissionError> {
        let attributes = {
            let state = self.state.lock();
            if state.destroyed {
                return Err(MissionError::Destroyed(self.object_id));
            }
            state.attributes.clone()
        };

        Ok(MissionRecord {
            object_id: self.object_id,
            planet: self.planet.clone(),
            template: self.template.clone(),
            schema_version: MISSION_SCHEMA_VERSION,
            attributes,
            saved_at: Utc::now(),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Remove the mission from the world.
    ///
    /// Drops every observer and rolls back a bound transaction. Returns false
    /// if it was already destroyed.
    pub fn destroy(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            state.destroyed = true;
            // Registration also happens under this lock
            self.observers.clear();
        }

        if let Some(txn) = self.transaction.close() {
            let txn_id = txn.id();
            if let Err(e) = txn.rollback() {
                warn!(object_id = %self.object_id, txn = %txn_id, error = %e, "Rollback on destroy failed");
            }
        }

        info!(object_id = %self.object_id, "Mission destroyed");
        true
    }
}
