//! Little-endian wire primitives shared by the baseline and delta encoders.

use super::{DecodeError, MAX_SHORT_STRING_LEN};
use tracing::warn;

/// Growable little-endian message writer.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a u16 byte length followed by UTF-8 bytes.
    ///
    /// Strings longer than `u16::MAX` bytes are cut at the last character
    /// boundary that fits. Mission setters refuse such values, so this only
    /// fires for data that bypassed them.
    pub fn write_short_string(&mut self, value: &str) {
        if value.len() > MAX_SHORT_STRING_LEN {
            warn!(len = value.len(), max = MAX_SHORT_STRING_LEN, "Short string truncated on the wire");
        }
        let mut end = value.len().min(MAX_SHORT_STRING_LEN);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u16(end as u16);
        self.write_bytes(&value.as_bytes()[..end]);
    }

    /// Writes a u32 UTF-16 unit count followed by UTF-16LE units.
    pub fn write_text(&mut self, value: &str) {
        let units: Vec<u16> = value.encode_utf16().collect();
        self.write_u32(units.len() as u32);
        for unit in units {
            self.write_u16(unit);
        }
    }
}

/// Cursor over a received message.
pub struct MessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> MessageReader<'a> {
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        let slice = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_tag(&mut self) -> Result<[u8; 4], DecodeError> {
        self.take_array()
    }

    pub fn read_short_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
    }

    pub fn read_text(&mut self) -> Result<String, DecodeError> {
        let count = self.read_u32()? as usize;
        let bytes = self.take(count.saturating_mul(2))?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidString)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_uses_utf16_units() {
        let mut writer = MessageWriter::new();
        writer.write_text("Añ");

        let bytes = writer.into_bytes();
        assert_eq!(bytes, vec![2, 0, 0, 0, b'A', 0, 0xF1, 0]);

        let mut reader = MessageReader::new(&bytes);
        assert_eq!(reader.read_text().unwrap(), "Añ");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_short_string_truncates_on_char_boundary() {
        // 'é' is two bytes; the cut must not split it
        let long = format!("{}é", "a".repeat(u16::MAX as usize - 1));
        let mut writer = MessageWriter::new();
        writer.write_short_string(&long);

        let bytes = writer.into_bytes();
        let mut reader = MessageReader::new(&bytes);
        let decoded = reader.read_short_string().unwrap();
        assert_eq!(decoded.len(), u16::MAX as usize - 1);
        assert!(decoded.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_truncated_read_reports_sizes() {
        let mut reader = MessageReader::new(&[1, 2, 3]);
        assert!(matches!(
            reader.read_u32(),
            Err(DecodeError::Truncated {
                needed: 4,
                remaining: 3
            })
        ));
    }
}
