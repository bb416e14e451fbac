//! Stitch class format definitions
//!
//! This crate provides the binary class format the Stitch weaving engine
//! reads and rewrites: the class/field/method model, the instruction set,
//! and the encoding/decoding utilities.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod codec;
pub mod insn;

pub use class::{flags, Annotation, ClassFile, ClassFileError, Field, Method, MAGIC, VERSION};
pub use codec::{ClassReader, ClassWriter, DecodeError};
pub use insn::{Insn, Opcode};
