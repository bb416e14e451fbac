//! Class encoding and decoding utilities
//!
//! Little-endian reader/writer pair used by every structure in the class
//! format. All length-prefixed values use a u32 prefix.

use thiserror::Error;

/// Errors that can occur while decoding class bytes
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of the byte stream
    #[error("Unexpected end of class data at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),
}

/// Writer for encoding class structures into a binary buffer
pub struct ClassWriter {
    pub(crate) buffer: Vec<u8>,
}

impl ClassWriter {
    /// Create a new empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Current offset (length of emitted bytes)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the writer and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_str(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit raw bytes without a length prefix
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Overwrite a previously emitted u32 at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for ClassWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for decoding class structures from a binary buffer
pub struct ClassReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ClassReader<'a> {
    /// Create a new reader over the given bytes
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.position >= self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(i64::from_le_bytes(bytes))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        if self.position + count > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = self.buffer[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if self.position + N > self.buffer.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_scalars() {
        let mut writer = ClassWriter::new();
        writer.emit_u8(0xAB);
        writer.emit_u16(0x1234);
        writer.emit_u32(0xDEADBEEF);
        writer.emit_i64(-42);
        writer.emit_str("hello");

        let bytes = writer.into_bytes();
        let mut reader = ClassReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(reader.read_i64().unwrap(), -42);
        assert_eq!(reader.read_string().unwrap(), "hello");
        assert!(!reader.has_more());
    }

    #[test]
    fn test_truncated_read_fails() {
        let mut writer = ClassWriter::new();
        writer.emit_u32(7);
        let bytes = writer.into_bytes();

        let mut reader = ClassReader::new(&bytes[..2]);
        assert!(matches!(
            reader.read_u32(),
            Err(DecodeError::UnexpectedEnd(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_string() {
        let mut writer = ClassWriter::new();
        writer.emit_u32(2);
        writer.emit_raw(&[0xFF, 0xFE]);
        let bytes = writer.into_bytes();

        let mut reader = ClassReader::new(&bytes);
        assert!(matches!(
            reader.read_string(),
            Err(DecodeError::InvalidUtf8(0))
        ));
    }

    #[test]
    fn test_patch_u32() {
        let mut writer = ClassWriter::new();
        let offset = writer.offset();
        writer.emit_u32(0);
        writer.emit_u8(1);
        writer.patch_u32(offset, 99);

        let bytes = writer.into_bytes();
        let mut reader = ClassReader::new(&bytes);
        assert_eq!(reader.read_u32().unwrap(), 99);
    }
}
