//! Mission wire schema.
//!
//! Every outgoing message starts with the same 22 byte little-endian header:
//!
//! ```text
//! off size field
//!   0    1 kind            0x01 baseline segment, 0x02 delta
//!   1    8 object id       u64
//!   9    4 type tag        b"MISO"
//!  13    1 segment         3 (static) or 6 (dynamic)
//!  14    2 schema version  u16
//!  16    4 sequence        u32 entity update counter
//!  20    2 count           fields in a baseline, updates in a delta (1)
//! ```
//!
//! A baseline payload is every field of its segment in field-index order.
//! A delta payload is a u16 field index followed by that field's value.
//!
//! Field indices are part of the schema and never change meaning:
//!
//! | segment | index | field             |
//! |---------|-------|-------------------|
//! | 3       | 0     | difficulty level  |
//! | 3       | 1     | destination       |
//! | 3       | 2     | creator           |
//! | 3       | 3     | credit reward     |
//! | 3       | 4     | start location    |
//! | 3       | 5     | target template   |
//! | 3       | 6     | description       |
//! | 3       | 7     | title             |
//! | 3       | 8     | mission type      |
//! | 3       | 9     | target name       |
//! | 6       | 0     | repeat count      |
//! | 6       | 1     | attached waypoint |

use crate::mission::ObjectId;
use thiserror::Error;

mod baseline;
mod delta;
mod wire;


pub use baseline::BaselineEncoder;
pub use delta::{DeltaEncoder, MissionDelta};
pub use wire::{MessageReader, MessageWriter};

/// Type tag identifying mission objects on the wire.
pub const MISSION_TYPE_TAG: [u8; 4] = *b"MISO";

/// Current entity schema version, written in every message and record.
pub const MISSION_SCHEMA_VERSION: u16 = 0;

/// Longest short string (u16 length prefix) a message can carry, in bytes.
pub const MAX_SHORT_STRING_LEN: usize = u16::MAX as usize;

/// Size of [`MessageHeader`] on the wire.
pub const HEADER_LEN: usize = 22;

/// Message kind byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Baseline = 0x01,
    Delta = 0x02,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Baseline),
            0x02 => Some(Self::Delta),
            _ => None,
        }
    }
}

/// Baseline segment; fields are grouped by how often they change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Segment {
    /// Set when the mission is generated, rarely touched afterwards
    Static = 3,
    /// Changes while the mission is in progress
    Dynamic = 6,
}

const STATIC_FIELDS: [MissionField; 10] = [
    MissionField::DifficultyLevel,
    MissionField::Destination,
    MissionField::Creator,
    MissionField::CreditReward,
    MissionField::Start,
    MissionField::TargetTemplate,
    MissionField::Description,
    MissionField::Title,
    MissionField::MissionType,
    MissionField::TargetName,
];

const DYNAMIC_FIELDS: [MissionField; 2] = [MissionField::RepeatCount, MissionField::AttachedWaypoint];

impl Segment {
    /// All segments, in the order baselines are sent.
    pub const ALL: [Segment; 2] = [Segment::Static, Segment::Dynamic];

    pub const fn number(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Self::Static),
            6 => Some(Self::Dynamic),
            _ => None,
        }
    }

    /// Fields of this segment in wire order.
    pub fn fields(self) -> &'static [MissionField] {
        match self {
            Segment::Static => &STATIC_FIELDS,
            Segment::Dynamic => &DYNAMIC_FIELDS,
        }
    }
}

/// Closed set of replicated mission fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MissionField {
    DifficultyLevel,
    Destination,
    Creator,
    CreditReward,
    Start,
    TargetTemplate,
    Description,
    Title,
    MissionType,
    TargetName,
    RepeatCount,
    AttachedWaypoint,
}

impl MissionField {
    pub const fn segment(self) -> Segment {
        match self {
            MissionField::RepeatCount | MissionField::AttachedWaypoint => Segment::Dynamic,
            _ => Segment::Static,
        }
    }

    /// Index of the field within its segment.
    pub const fn index(self) -> u16 {
        match self {
            MissionField::DifficultyLevel => 0,
            MissionField::Destination => 1,
            MissionField::Creator => 2,
            MissionField::CreditReward => 3,
            MissionField::Start => 4,
            MissionField::TargetTemplate => 5,
            MissionField::Description => 6,
            MissionField::Title => 7,
            MissionField::MissionType => 8,
            MissionField::TargetName => 9,
            MissionField::RepeatCount => 0,
            MissionField::AttachedWaypoint => 1,
        }
    }

    pub fn from_wire(segment: Segment, index: u16) -> Option<Self> {
        segment.fields().get(index as usize).copied()
    }
}

/// Common header of baseline and delta messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub object_id: ObjectId,
    pub segment: Segment,
    pub schema_version: u16,
    pub sequence: u32,
    pub count: u16,
}

impl MessageHeader {
    pub fn write(&self, writer: &mut MessageWriter) {
        writer.write_u8(self.kind as u8);
        writer.write_u64(self.object_id.0);
        writer.write_bytes(&MISSION_TYPE_TAG);
        writer.write_u8(self.segment.number());
        writer.write_u16(self.schema_version);
        writer.write_u32(self.sequence);
        writer.write_u16(self.count);
    }

    pub fn read(reader: &mut MessageReader<'_>) -> Result<Self, DecodeError> {
        let kind_byte = reader.read_u8()?;
        let kind = MessageKind::from_u8(kind_byte).ok_or(DecodeError::UnknownKind(kind_byte))?;
        let object_id = ObjectId(reader.read_u64()?);

        let tag = reader.read_tag()?;
        if tag != MISSION_TYPE_TAG {
            return Err(DecodeError::WrongTypeTag(tag));
        }

        let segment_byte = reader.read_u8()?;
        let segment =
            Segment::from_u8(segment_byte).ok_or(DecodeError::UnknownSegment(segment_byte))?;

        let schema_version = reader.read_u16()?;
        if schema_version > MISSION_SCHEMA_VERSION {
            return Err(DecodeError::UnsupportedSchemaVersion(schema_version));
        }

        Ok(Self {
            kind,
            object_id,
            segment,
            schema_version,
            sequence: reader.read_u32()?,
            count: reader.read_u16()?,
        })
    }
}

/// A fully decoded mission message.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedMessage {
    Baseline {
        header: MessageHeader,
        fields: Vec<MissionDelta>,
    },
    Delta {
        header: MessageHeader,
        delta: MissionDelta,
    },
}

impl DecodedMessage {
    pub fn header(&self) -> &MessageHeader {
        match self {
            DecodedMessage::Baseline { header, .. } | DecodedMessage::Delta { header, .. } => {
                header
            }
        }
    }
}

/// Malformed inbound bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    #[error("unexpected type tag {0:?}")]
    WrongTypeTag([u8; 4]),
    #[error("unknown segment {0}")]
    UnknownSegment(u8),
    #[error("schema version {0} is newer than supported version {max}", max = MISSION_SCHEMA_VERSION)]
    UnsupportedSchemaVersion(u16),
    #[error("unknown field {index} in segment {segment}")]
    UnknownField { segment: u8, index: u16 },
    #[error("expected {expected} entries, message declares {found}")]
    CountMismatch { expected: u16, found: u16 },
    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),
    #[error("string is not valid UTF-8/UTF-16")]
    InvalidString,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Decode one baseline segment or delta message.
pub fn decode(bytes: &[u8]) -> Result<DecodedMessage, DecodeError> {
    let mut reader = MessageReader::new(bytes);
    let header = MessageHeader::read(&mut reader)?;

    let message = match header.kind {
        MessageKind::Baseline => {
            let fields = header.segment.fields();
            let expected = fields.len() as u16;
            if header.count != expected {
                return Err(DecodeError::CountMismatch {
                    expected,
                    found: header.count,
                });
            }
            let fields = fields
                .iter()
                .map(|field| delta::read_value(&mut reader, *field))
                .collect::<Result<Vec<_>, _>>()?;
            DecodedMessage::Baseline { header, fields }
        }
        MessageKind::Delta => {
            if header.count != 1 {
                return Err(DecodeError::CountMismatch {
                    expected: 1,
                    found: header.count,
                });
            }
            let index = reader.read_u16()?;
            let field = MissionField::from_wire(header.segment, index).ok_or(
                DecodeError::UnknownField {
                    segment: header.segment.number(),
                    index,
                },
            )?;
            let delta = delta::read_value(&mut reader, field)?;
            DecodedMessage::Delta { header, delta }
        }
    };

    match reader.remaining() {
        0 => Ok(message),
        extra => Err(DecodeError::TrailingBytes(extra)),
    }
}
