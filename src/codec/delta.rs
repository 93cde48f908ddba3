use super::{
    DecodeError, MessageHeader, MessageKind, MessageReader, MessageWriter, MissionField,
    HEADER_LEN, MAX_SHORT_STRING_LEN, MISSION_SCHEMA_VERSION,
};
use crate::mission::{Location, MissionAttributes, ObjectId, StfText, WaypointObject};
use std::sync::Arc;

/// A new value for exactly one replicated field.
///
/// Each variant fixes both the field identifier and the value type, so a
/// delta for a field outside the schema cannot be built. Paired values
/// (position and planet, text and string id) travel in one variant.
#[derive(Clone, Debug, PartialEq)]
pub enum MissionDelta {
    DifficultyLevel(i32),
    Destination(Location),
    Creator(String),
    CreditReward(i32),
    Start(Location),
    TargetTemplate(String),
    Description(StfText),
    Title(StfText),
    MissionType(String),
    TargetName(String),
    RepeatCount(i32),
    AttachedWaypoint(Option<Arc<WaypointObject>>),
}

impl MissionDelta {
    pub fn field(&self) -> MissionField {
        match self {
            MissionDelta::DifficultyLevel(_) => MissionField::DifficultyLevel,
            MissionDelta::Destination(_) => MissionField::Destination,
            MissionDelta::Creator(_) => MissionField::Creator,
            MissionDelta::CreditReward(_) => MissionField::CreditReward,
            MissionDelta::Start(_) => MissionField::Start,
            MissionDelta::TargetTemplate(_) => MissionField::TargetTemplate,
            MissionDelta::Description(_) => MissionField::Description,
            MissionDelta::Title(_) => MissionField::Title,
            MissionDelta::MissionType(_) => MissionField::MissionType,
            MissionDelta::TargetName(_) => MissionField::TargetName,
            MissionDelta::RepeatCount(_) => MissionField::RepeatCount,
            MissionDelta::AttachedWaypoint(_) => MissionField::AttachedWaypoint,
        }
    }

    /// Byte length of the first short string in this value that does not
    /// fit its u16 length prefix, if any.
    pub fn oversized_len(&self) -> Option<usize> {
        let short_strings: Vec<&str> = match self {
            MissionDelta::DifficultyLevel(_)
            | MissionDelta::CreditReward(_)
            | MissionDelta::RepeatCount(_)
            | MissionDelta::Creator(_)
            | MissionDelta::AttachedWaypoint(None) => Vec::new(),
            MissionDelta::Destination(v) | MissionDelta::Start(v) => vec![v.planet.as_str()],
            MissionDelta::Description(v) | MissionDelta::Title(v) => vec![v.id.as_str()],
            MissionDelta::TargetTemplate(v)
            | MissionDelta::MissionType(v)
            | MissionDelta::TargetName(v) => vec![v.as_str()],
            MissionDelta::AttachedWaypoint(Some(w)) => vec![w.location.planet.as_str()],
        };

        short_strings
            .into_iter()
            .map(str::len)
            .find(|len| *len > MAX_SHORT_STRING_LEN)
    }

    /// Copy the current value of `field` out of `attributes`.
    pub fn capture(field: MissionField, attributes: &MissionAttributes) -> Self {
        match field {
            MissionField::DifficultyLevel => Self::DifficultyLevel(attributes.difficulty_level),
            MissionField::Destination => Self::Destination(attributes.destination.clone()),
            MissionField::Creator => Self::Creator(attributes.creator.clone()),
            MissionField::CreditReward => Self::CreditReward(attributes.credit_reward),
            MissionField::Start => Self::Start(attributes.start.clone()),
            MissionField::TargetTemplate => Self::TargetTemplate(attributes.target_template.clone()),
            MissionField::Description => Self::Description(attributes.description.clone()),
            MissionField::Title => Self::Title(attributes.title.clone()),
            MissionField::MissionType => Self::MissionType(attributes.mission_type.clone()),
            MissionField::TargetName => Self::TargetName(attributes.target_name.clone()),
            MissionField::RepeatCount => Self::RepeatCount(attributes.repeat_count),
            MissionField::AttachedWaypoint => {
                Self::AttachedWaypoint(attributes.attached_waypoint.clone())
            }
        }
    }
}

/// Builds delta messages. Holds no entity state.
#[derive(Clone, Copy, Debug)]
pub struct DeltaEncoder {
    schema_version: u16,
}

impl DeltaEncoder {
    pub const fn new(schema_version: u16) -> Self {
        Self { schema_version }
    }

    pub const fn schema_version(&self) -> u16 {
        self.schema_version
    }

    /// Encode a single field change.
    pub fn encode(&self, object_id: ObjectId, sequence: u32, delta: &MissionDelta) -> Vec<u8> {
        let field = delta.field();
        let mut writer = MessageWriter::with_capacity(HEADER_LEN + 32);

        MessageHeader {
            kind: MessageKind::Delta,
            object_id,
            segment: field.segment(),
            schema_version: self.schema_version,
            sequence,
            count: 1,
        }
        .write(&mut writer);

        writer.write_u16(field.index());
        write_value(&mut writer, delta);
        writer.into_bytes()
    }
}

impl Default for DeltaEncoder {
    fn default() -> Self {
        Self::new(MISSION_SCHEMA_VERSION)
    }
}

// Coordinates go out as x, z, y: the horizontal plane first, height last.
fn write_location(writer: &mut MessageWriter, location: &Location) {
    writer.write_f32(location.x);
    writer.write_f32(location.z);
    writer.write_f32(location.y);
    writer.write_short_string(&location.planet);
}

fn read_location(reader: &mut MessageReader<'_>) -> Result<Location, DecodeError> {
    let x = reader.read_f32()?;
    let z = reader.read_f32()?;
    let y = reader.read_f32()?;
    let planet = reader.read_short_string()?;
    Ok(Location { x, y, z, planet })
}

fn write_stf(writer: &mut MessageWriter, stf: &StfText) {
    writer.write_text(&stf.text);
    writer.write_short_string(&stf.id);
}

fn read_stf(reader: &mut MessageReader<'_>) -> Result<StfText, DecodeError> {
    let text = reader.read_text()?;
    let id = reader.read_short_string()?;
    Ok(StfText { text, id })
}

fn write_waypoint(writer: &mut MessageWriter, waypoint: Option<&WaypointObject>) {
    match waypoint {
        None => writer.write_u8(0),
        Some(waypoint) => {
            writer.write_u8(1);
            writer.write_u64(waypoint.object_id.0);
            write_location(writer, &waypoint.location);
            writer.write_text(&waypoint.name);
        }
    }
}

fn read_waypoint(
    reader: &mut MessageReader<'_>,
) -> Result<Option<Arc<WaypointObject>>, DecodeError> {
    match reader.read_u8()? {
        0 => Ok(None),
        1 => {
            let object_id = ObjectId(reader.read_u64()?);
            let location = read_location(reader)?;
            let name = reader.read_text()?;
            Ok(Some(Arc::new(WaypointObject {
                object_id,
                location,
                name,
            })))
        }
        flag => Err(DecodeError::InvalidFlag(flag)),
    }
}

pub(super) fn write_value(writer: &mut MessageWriter, delta: &MissionDelta) {
    match delta {
        MissionDelta::DifficultyLevel(v)
        | MissionDelta::CreditReward(v)
        | MissionDelta::RepeatCount(v) => writer.write_i32(*v),
        MissionDelta::Destination(v) | MissionDelta::Start(v) => write_location(writer, v),
        MissionDelta::Creator(v) => writer.write_text(v),
        MissionDelta::Description(v) | MissionDelta::Title(v) => write_stf(writer, v),
        MissionDelta::TargetTemplate(v)
        | MissionDelta::MissionType(v)
        | MissionDelta::TargetName(v) => writer.write_short_string(v),
        MissionDelta::AttachedWaypoint(v) => write_waypoint(writer, v.as_deref()),
    }
}

pub(super) fn read_value(
    reader: &mut MessageReader<'_>,
    field: MissionField,
) -> Result<MissionDelta, DecodeError> {
    Ok(match field {
        MissionField::DifficultyLevel => MissionDelta::DifficultyLevel(reader.read_i32()?),
        MissionField::Destination => MissionDelta::Destination(read_location(reader)?),
        MissionField::Creator => MissionDelta::Creator(reader.read_text()?),
        MissionField::CreditReward => MissionDelta::CreditReward(reader.read_i32()?),
        MissionField::Start => MissionDelta::Start(read_location(reader)?),
        MissionField::TargetTemplate => MissionDelta::TargetTemplate(reader.read_short_string()?),
        MissionField::Description => MissionDelta::Description(read_stf(reader)?),
        MissionField::Title => MissionDelta::Title(read_stf(reader)?),
        MissionField::MissionType => MissionDelta::MissionType(reader.read_short_string()?),
        MissionField::TargetName => MissionDelta::TargetName(reader.read_short_string()?),
        MissionField::RepeatCount => MissionDelta::RepeatCount(reader.read_i32()?),
        MissionField::AttachedWaypoint => MissionDelta::AttachedWaypoint(read_waypoint(reader)?),
    })
}
