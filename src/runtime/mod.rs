//! Execution engine: the environment/linker, the validating module
//! builder, and the stack-machine interpreter.

pub mod builder;
pub mod code;
pub mod env;
pub mod host;
pub mod memory;
pub mod numeric;
pub mod table;
pub mod thread;
pub mod value;

pub use crate::parser::LoadError;
pub use builder::read_binary;
pub use env::{DefinedModule, Environment, Export, Func, Global, HostModule, MarkPoint, Module};
pub use host::{HostImportDelegate, ImportDesc, SpectestImportDelegate};
pub use memory::Memory;
pub use table::Table;
pub use thread::{Thread, ThreadOptions};
pub use value::Value;

/// Abnormal termination of a WebAssembly invocation.
///
/// The dispatch loop never panics or unwinds; every trap is a tagged
/// return from [`Thread::run_function`]. Traps abort the current
/// invocation but leave the [`Environment`] usable for subsequent calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access")]
    MemoryAccessOutOfBounds,
    #[error("undefined table index")]
    UndefinedTableIndex,
    #[error("uninitialized table element")]
    UninitializedElement,
    #[error("indirect call signature mismatch")]
    IndirectCallSignatureMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("value stack exhausted")]
    ValueStackExhausted,
    #[error("unknown export")]
    UnknownExport,
    #[error("export kind mismatch")]
    ExportKindMismatch,
    #[error("argument type mismatch")]
    ArgumentTypeMismatch,
    #[error("host function trapped")]
    HostTrapped,
}
