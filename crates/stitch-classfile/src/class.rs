//! Class file model and binary format
//!
//! Format:
//! - Header: magic (4 bytes) + version (u32) + access (u32) + checksum (u32)
//! - Name, optional supertype, interface list
//! - Class annotations
//! - Field table
//! - Method table (each with its code section)
//!
//! The checksum is a CRC32 of everything after the header.

use crate::codec::{ClassReader, ClassWriter, DecodeError};
use crate::insn::Insn;
use thiserror::Error;

/// Magic number for Stitch class files: "WCLS"
pub const MAGIC: [u8; 4] = *b"WCLS";

/// Current class format version
pub const VERSION: u32 = 1;

/// Access flags for classes and members
pub mod flags {
    /// Publicly accessible
    pub const PUBLIC: u32 = 1 << 0;
    /// Accessible only from the declaring class
    pub const PRIVATE: u32 = 1 << 1;
    /// Static member
    pub const STATIC: u32 = 1 << 2;
    /// Non-extensible class or non-overridable member
    pub const FINAL: u32 = 1 << 3;
    /// Abstract class or bodiless method
    pub const ABSTRACT: u32 = 1 << 4;
    /// Interface type
    pub const INTERFACE: u32 = 1 << 5;
    /// Annotation type
    pub const ANNOTATION: u32 = 1 << 6;
}

/// Class encoding/decoding errors
#[derive(Debug, Error)]
pub enum ClassFileError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected WCLS, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported class format version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },
}

/// An annotation with string key/value parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Internal name of the annotation type
    pub name: String,
    /// Parameter key/value pairs, in declaration order
    pub values: Vec<(String, String)>,
}

impl Annotation {
    /// Create a parameterless annotation
    pub fn marker(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Create an annotation with the given parameters
    pub fn with_values(name: impl Into<String>, values: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Look up a parameter value by key
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_str(&self.name);
        writer.emit_u32(self.values.len() as u32);
        for (key, value) in &self.values {
            writer.emit_str(key);
            writer.emit_str(value);
        }
    }

    fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let count = reader.read_u32()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let key = reader.read_string()?;
            let value = reader.read_string()?;
            values.push((key, value));
        }
        Ok(Self { name, values })
    }
}

/// A field declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// Access flags
    pub access: u32,
    /// Field annotations
    pub annotations: Vec<Annotation>,
}

impl Field {
    fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_str(&self.name);
        writer.emit_str(&self.descriptor);
        writer.emit_u32(self.access);
        encode_annotations(writer, &self.annotations);
    }

    fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let access = reader.read_u32()?;
        let annotations = decode_annotations(reader)?;
        Ok(Self {
            name,
            descriptor,
            access,
            annotations,
        })
    }
}

/// A method declaration with its code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags
    pub access: u32,
    /// Method annotations
    pub annotations: Vec<Annotation>,
    /// Method body
    pub code: Vec<Insn>,
}

impl Method {
    fn encode(&self, writer: &mut ClassWriter) {
        writer.emit_str(&self.name);
        writer.emit_str(&self.descriptor);
        writer.emit_u32(self.access);
        encode_annotations(writer, &self.annotations);
        writer.emit_u32(self.code.len() as u32);
        for insn in &self.code {
            insn.encode(writer);
        }
    }

    fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let access = reader.read_u32()?;
        let annotations = decode_annotations(reader)?;
        let insn_count = reader.read_u32()? as usize;
        let mut code = Vec::with_capacity(insn_count);
        for _ in 0..insn_count {
            code.push(Insn::decode(reader)?);
        }
        Ok(Self {
            name,
            descriptor,
            access,
            annotations,
            code,
        })
    }
}

/// A decoded class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Class format version
    pub version: u32,
    /// Access flags
    pub access: u32,
    /// Internal class name, e.g. `app/http/Router`
    pub name: String,
    /// Direct supertype name, if any
    pub super_name: Option<String>,
    /// Direct interface names
    pub interfaces: Vec<String>,
    /// Class annotations
    pub annotations: Vec<Annotation>,
    /// Declared fields
    pub fields: Vec<Field>,
    /// Declared methods
    pub methods: Vec<Method>,
}

impl ClassFile {
    /// Create a new empty public class
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: VERSION,
            access: flags::PUBLIC,
            name: name.into(),
            super_name: None,
            interfaces: Vec::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Whether the given access flag is set on the class
    pub fn has_flag(&self, flag: u32) -> bool {
        self.access & flag != 0
    }

    /// Find a class annotation by type name
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }

    /// Find a declared field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a declared method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Find a declared method by name and descriptor, mutably
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Encode the class to its binary form
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ClassWriter::new();

        writer.emit_raw(&MAGIC);
        writer.emit_u32(self.version);
        writer.emit_u32(self.access);
        let checksum_offset = writer.offset();
        writer.emit_u32(0); // placeholder for checksum

        writer.emit_str(&self.name);
        match &self.super_name {
            Some(super_name) => {
                writer.emit_u8(1);
                writer.emit_str(super_name);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u32(self.interfaces.len() as u32);
        for interface in &self.interfaces {
            writer.emit_str(interface);
        }
        encode_annotations(&mut writer, &self.annotations);

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut writer);
        }
        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        // CRC32 of everything after the 16-byte header
        let checksum = crc32fast::hash(&writer.buffer[16..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a class from its binary form
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = ClassReader::new(data);

        let magic: [u8; 4] = reader
            .read_bytes(4)?
            .try_into()
            .map_err(|_| DecodeError::UnexpectedEnd(0))?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ClassFileError::UnsupportedVersion(version));
        }

        let access = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let actual = crc32fast::hash(&data[16..]);
        if stored_checksum != actual {
            return Err(ClassFileError::ChecksumMismatch {
                expected: stored_checksum,
                actual,
            });
        }

        let name = reader.read_string()?;
        let super_name = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };

        let interface_count = reader.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(reader.read_string()?);
        }

        let annotations = decode_annotations(&mut reader)?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(Field::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(Method::decode(&mut reader)?);
        }

        Ok(Self {
            version,
            access,
            name,
            super_name,
            interfaces,
            annotations,
            fields,
            methods,
        })
    }
}

fn encode_annotations(writer: &mut ClassWriter, annotations: &[Annotation]) {
    writer.emit_u32(annotations.len() as u32);
    for annotation in annotations {
        annotation.encode(writer);
    }
}

fn decode_annotations(reader: &mut ClassReader<'_>) -> Result<Vec<Annotation>, DecodeError> {
    let count = reader.read_u32()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(Annotation::decode(reader)?);
    }
    Ok(annotations)
}
