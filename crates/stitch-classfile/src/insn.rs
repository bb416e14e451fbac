//! Instruction set for method bodies
//!
//! Method code is a flat stream of instructions. Every instruction starts
//! with a single opcode byte; operands follow inline (length-prefixed
//! strings for symbolic references).

use crate::codec::{ClassReader, ClassWriter, DecodeError};

/// Instruction opcode bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Push a string constant (operand: str)
    Const = 0x01,
    /// Load an argument onto the stack (operand: u16 index)
    LoadArg = 0x02,
    /// Read a field (operands: owner, name, descriptor)
    GetField = 0x03,
    /// Write a field (operands: owner, name, descriptor)
    PutField = 0x04,
    /// Invoke a method (operands: owner, name, descriptor)
    Invoke = 0x05,
    /// Concatenate the two top stack values
    Concat = 0x06,
    /// Pop the top stack value
    Pop = 0x07,
    /// Return the top stack value
    Return = 0x08,
}

impl Opcode {
    /// Convert a raw byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::Const),
            0x02 => Some(Opcode::LoadArg),
            0x03 => Some(Opcode::GetField),
            0x04 => Some(Opcode::PutField),
            0x05 => Some(Opcode::Invoke),
            0x06 => Some(Opcode::Concat),
            0x07 => Some(Opcode::Pop),
            0x08 => Some(Opcode::Return),
            _ => None,
        }
    }

    /// Convert the opcode to its byte value
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A single decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Push a string constant
    Const(String),
    /// Load the n-th argument
    LoadArg(u16),
    /// Read a field from `owner`
    GetField {
        /// Internal name of the owning class
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        descriptor: String,
    },
    /// Write a field on `owner`
    PutField {
        /// Internal name of the owning class
        owner: String,
        /// Field name
        name: String,
        /// Field descriptor
        descriptor: String,
    },
    /// Invoke a method on `owner`
    Invoke {
        /// Internal name of the owning class
        owner: String,
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
    },
    /// Concatenate the two top stack values
    Concat,
    /// Pop the top stack value
    Pop,
    /// Return the top stack value
    Return,
}

impl Insn {
    /// Encode the instruction into the writer
    pub fn encode(&self, writer: &mut ClassWriter) {
        match self {
            Insn::Const(value) => {
                writer.emit_u8(Opcode::Const.to_u8());
                writer.emit_str(value);
            }
            Insn::LoadArg(index) => {
                writer.emit_u8(Opcode::LoadArg.to_u8());
                writer.emit_u16(*index);
            }
            Insn::GetField {
                owner,
                name,
                descriptor,
            } => {
                writer.emit_u8(Opcode::GetField.to_u8());
                encode_member(writer, owner, name, descriptor);
            }
            Insn::PutField {
                owner,
                name,
                descriptor,
            } => {
                writer.emit_u8(Opcode::PutField.to_u8());
                encode_member(writer, owner, name, descriptor);
            }
            Insn::Invoke {
                owner,
                name,
                descriptor,
            } => {
                writer.emit_u8(Opcode::Invoke.to_u8());
                encode_member(writer, owner, name, descriptor);
            }
            Insn::Concat => writer.emit_u8(Opcode::Concat.to_u8()),
            Insn::Pop => writer.emit_u8(Opcode::Pop.to_u8()),
            Insn::Return => writer.emit_u8(Opcode::Return.to_u8()),
        }
    }

    /// Decode a single instruction from the reader
    pub fn decode(reader: &mut ClassReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))?;
        match opcode {
            Opcode::Const => Ok(Insn::Const(reader.read_string()?)),
            Opcode::LoadArg => Ok(Insn::LoadArg(reader.read_u16()?)),
            Opcode::GetField => {
                let (owner, name, descriptor) = decode_member(reader)?;
                Ok(Insn::GetField {
                    owner,
                    name,
                    descriptor,
                })
            }
            Opcode::PutField => {
                let (owner, name, descriptor) = decode_member(reader)?;
                Ok(Insn::PutField {
                    owner,
                    name,
                    descriptor,
                })
            }
            Opcode::Invoke => {
                let (owner, name, descriptor) = decode_member(reader)?;
                Ok(Insn::Invoke {
                    owner,
                    name,
                    descriptor,
                })
            }
            Opcode::Concat => Ok(Insn::Concat),
            Opcode::Pop => Ok(Insn::Pop),
            Opcode::Return => Ok(Insn::Return),
        }
    }
}

fn encode_member(writer: &mut ClassWriter, owner: &str, name: &str, descriptor: &str) {
    writer.emit_str(owner);
    writer.emit_str(name);
    writer.emit_str(descriptor);
}

fn decode_member(reader: &mut ClassReader<'_>) -> Result<(String, String, String), DecodeError> {
    let owner = reader.read_string()?;
    let name = reader.read_string()?;
    let descriptor = reader.read_string()?;
    Ok((owner, name, descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_roundtrip() {
        for opcode in [
            Opcode::Const,
            Opcode::LoadArg,
            Opcode::GetField,
            Opcode::PutField,
            Opcode::Invoke,
            Opcode::Concat,
            Opcode::Pop,
            Opcode::Return,
        ] {
            assert_eq!(Opcode::from_u8(opcode.to_u8()), Some(opcode));
        }
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_insn_roundtrip() {
        let insns = vec![
            Insn::Const("marker".to_string()),
            Insn::LoadArg(2),
            Insn::Invoke {
                owner: "app/Service".to_string(),
                name: "handle".to_string(),
                descriptor: "()S".to_string(),
            },
            Insn::GetField {
                owner: "app/Service".to_string(),
                name: "state".to_string(),
                descriptor: "S".to_string(),
            },
            Insn::Concat,
            Insn::Return,
        ];

        let mut writer = ClassWriter::new();
        for insn in &insns {
            insn.encode(&mut writer);
        }

        let bytes = writer.into_bytes();
        let mut reader = ClassReader::new(&bytes);
        let mut decoded = Vec::new();
        while reader.has_more() {
            decoded.push(Insn::decode(&mut reader).unwrap());
        }
        assert_eq!(decoded, insns);
    }

    #[test]
    fn test_invalid_opcode() {
        let bytes = [0x7Fu8];
        let mut reader = ClassReader::new(&bytes);
        assert!(matches!(
            Insn::decode(&mut reader),
            Err(DecodeError::InvalidOpcode(0x7F, 0))
        ));
    }
}
