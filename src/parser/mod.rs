//! Binary format decoder.
//!
//! The decoder streams a `.wasm` binary through the [`ModuleVisitor`] event
//! interface: one callback per section entry and per instruction. It
//! performs structural checks only (magic number, version, section order,
//! LEB128 encoding, UTF-8 names, indices within declared counts); operand
//! typing is enforced by the consumer of the events.

pub mod binary;
pub mod opcodes;
pub mod reader;

pub use binary::{read_module, InitExpr, ModuleVisitor};
pub use opcodes::{MemArg, Operator};
pub use reader::Reader;

/// A load-time failure: malformed, invalid, or unlinkable input, reported
/// with the byte offset at which decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error at offset 0x{offset:06x}: {message}")]
pub struct LoadError {
    pub offset: usize,
    pub message: String,
}

impl LoadError {
    pub fn new(offset: usize, message: impl Into<String>) -> LoadError {
        LoadError {
            offset,
            message: message.into(),
        }
    }
}
