//! host1x command stream codec.
//!
//! A host1x command stream is a sequence of little-endian 32-bit words. Every command starts
//! with a header word whose top nibble (`[31:28]`) selects the opcode; most opcodes are followed
//! by a payload of register values.
//!
//! This crate provides:
//! - [`opcode`]: bit-exact header encoders and the [`Header`] decoder,
//! - [`decode`]: lazy iterators over commands ([`Commands`]) and the flattened
//!   `(class, register, value)` writes they perform ([`RegisterWrites`]),
//! - [`writer`]: a `Vec<u32>`-backed [`StreamWriter`] for fixtures and tools,
//! - [`disasm`]: a text disassembler that writes into caller-owned strings,
//! - [`class`]: well-known class ids and the `INCR_SYNCPT` register layout.
//!
//! Header field encoders mask every field to its declared width. Out-of-range inputs are
//! truncated, never rejected: callers pack constants relying on this.
#![forbid(unsafe_code)]

pub mod class;
pub mod decode;
pub mod disasm;
pub mod opcode;
pub mod writer;

#[cfg(test)]
mod proptests;

pub use decode::{
    decode, Command, CommandWrites, Commands, DecodeAnomaly, RegisterWrite, RegisterWrites,
};
pub use disasm::{disassemble, disassemble_into};
pub use opcode::{Header, Opcode};
pub use writer::StreamWriter;
