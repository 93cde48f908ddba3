use super::delta::write_value;
use super::{
    MessageHeader, MessageKind, MessageWriter, MissionDelta, Segment, HEADER_LEN,
    MISSION_SCHEMA_VERSION,
};
use crate::mission::{MissionAttributes, ObjectId};

/// Builds full-state baseline segments from an attribute snapshot.
///
/// Field order comes from [`Segment::fields`], never from the snapshot, so
/// identical input always yields identical bytes.
#[derive(Clone, Copy, Debug)]
pub struct BaselineEncoder {
    schema_version: u16,
}

impl BaselineEncoder {
    pub const fn new(schema_version: u16) -> Self {
        Self { schema_version }
    }

    pub fn encode_segment(
        &self,
        object_id: ObjectId,
        sequence: u32,
        segment: Segment,
        attributes: &MissionAttributes,
    ) -> Vec<u8> {
        let fields = segment.fields();
        let mut writer = MessageWriter::with_capacity(HEADER_LEN + 128);

        MessageHeader {
            kind: MessageKind::Baseline,
            object_id,
            segment,
            schema_version: self.schema_version,
            sequence,
            count: fields.len() as u16,
        }
        .write(&mut writer);

        for field in fields {
            write_value(&mut writer, &MissionDelta::capture(*field, attributes));
        }

        writer.into_bytes()
    }

    /// Encode every segment, in [`Segment::ALL`] order.
    pub fn encode_segments(
        &self,
        object_id: ObjectId,
        sequence: u32,
        attributes: &MissionAttributes,
    ) -> Vec<Vec<u8>> {
        Segment::ALL
            .iter()
            .map(|segment| self.encode_segment(object_id, sequence, *segment, attributes))
            .collect()
    }
}

impl Default for BaselineEncoder {
    fn default() -> Self {
        Self::new(MISSION_SCHEMA_VERSION)
    }
}
