use crate::codec::MissionDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable world object identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in the world plus the planet it is on.
///
/// Replicated as one unit: a client never sees a new position with an old
/// planet or the other way round.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub planet: String,
}

impl Location {
    pub fn new(x: f32, y: f32, z: f32, planet: impl Into<String>) -> Self {
        Self {
            x,
            y,
            z,
            planet: planet.into(),
        }
    }
}

/// Player-visible text together with the string table id it came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StfText {
    pub text: String,
    pub id: String,
}

impl StfText {
    pub fn new(text: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            id: id.into(),
        }
    }
}

/// Waypoint entity a mission can point at.
///
/// Owned elsewhere in the world; missions only hold a shared reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaypointObject {
    pub object_id: ObjectId,
    pub location: Location,
    pub name: String,
}

/// Every replicated field of a mission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionAttributes {
    /// Difficulty level displayed in the mission details
    pub difficulty_level: i32,
    pub destination: Location,
    pub creator: String,
    pub credit_reward: i32,
    pub start: Location,
    /// Template of the object the mission targets
    pub target_template: String,
    pub description: StfText,
    pub title: StfText,
    pub mission_type: String,
    pub target_name: String,
    /// Incremented for each player taking the mission
    pub repeat_count: i32,
    pub attached_waypoint: Option<Arc<WaypointObject>>,
}

impl MissionAttributes {
    /// Apply a received delta to this copy of the attributes.
    ///
    /// This is the client side of replication: a replica built from the
    /// baselines and then fed every later delta ends up equal to the server.
    pub fn apply(&mut self, delta: MissionDelta) {
        match delta {
            MissionDelta::DifficultyLevel(v) => self.difficulty_level = v,
            MissionDelta::Destination(v) => self.destination = v,
            MissionDelta::Creator(v) => self.creator = v,
            MissionDelta::CreditReward(v) => self.credit_reward = v,
            MissionDelta::Start(v) => self.start = v,
            MissionDelta::TargetTemplate(v) => self.target_template = v,
            MissionDelta::Description(v) => self.description = v,
            MissionDelta::Title(v) => self.title = v,
            MissionDelta::MissionType(v) => self.mission_type = v,
            MissionDelta::TargetName(v) => self.target_name = v,
            MissionDelta::RepeatCount(v) => self.repeat_count = v,
            MissionDelta::AttachedWaypoint(v) => self.attached_waypoint = v,
        }
    }
}
