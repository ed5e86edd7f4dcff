//! Common WebAssembly type definitions shared by the parser and runtime:
//! value types, function signatures, limits, and external kinds, along with
//! the NaN bit-pattern predicates used by the specification test suite.

use std::fmt;

/// A WebAssembly value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// Decode a value type from its binary encoding.
    pub fn decode(byte: u8) -> Result<ValueType, String> {
        match byte {
            0x7f => Ok(ValueType::I32),
            0x7e => Ok(ValueType::I64),
            0x7d => Ok(ValueType::F32),
            0x7c => Ok(ValueType::F64),
            b => Err(format!("invalid value type: 0x{b:02x}")),
        }
    }

    /// The textual name used in error messages and disassembly.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered parameter list and result list.
///
/// The MVP restricts results to at most one element; the validator rejects
/// anything longer when the type section is read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncSignature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FuncSignature {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> FuncSignature {
        FuncSignature { params, results }
    }
}

impl fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> (")?;
        for (i, r) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, ")")
    }
}

/// Size limits for tables and memories: an initial size and an optional
/// maximum. `initial <= max` whenever a maximum is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub initial: u32,
    pub max: Option<u32>,
}

impl Limits {
    pub fn new(initial: u32, max: Option<u32>) -> Limits {
        Limits { initial, max }
    }

    /// Import matching: do these (actual) limits satisfy the declared ones?
    ///
    /// The actual entity must be at least as large as declared, and must not
    /// be able to outgrow a declared maximum.
    pub fn satisfies(&self, declared: &Limits) -> bool {
        if self.initial < declared.initial {
            return false;
        }
        match declared.max {
            None => true,
            Some(declared_max) => match self.max {
                Some(actual_max) => actual_max <= declared_max,
                None => false,
            },
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{{min: {}, max: {}}}", self.initial, max),
            None => write!(f, "{{min: {}}}", self.initial),
        }
    }
}

/// The kind of an import or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    /// Decode an external kind from its binary encoding.
    pub fn decode(byte: u8) -> Result<ExternalKind, String> {
        match byte {
            0x00 => Ok(ExternalKind::Func),
            0x01 => Ok(ExternalKind::Table),
            0x02 => Ok(ExternalKind::Memory),
            0x03 => Ok(ExternalKind::Global),
            b => Err(format!("invalid external kind: 0x{b:02x}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExternalKind::Func => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
        }
    }
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An f32 canonical NaN: quiet bit set, every other payload bit zero.
pub fn is_canonical_nan_f32(bits: u32) -> bool {
    (bits & 0x7fff_ffff) == 0x7fc0_0000
}

/// An f32 arithmetic NaN: quiet bit set, any payload.
pub fn is_arithmetic_nan_f32(bits: u32) -> bool {
    (bits & 0x7fc0_0000) == 0x7fc0_0000
}

/// An f64 canonical NaN: quiet bit set, every other payload bit zero.
pub fn is_canonical_nan_f64(bits: u64) -> bool {
    (bits & 0x7fff_ffff_ffff_ffff) == 0x7ff8_0000_0000_0000
}

/// An f64 arithmetic NaN: quiet bit set, any payload.
pub fn is_arithmetic_nan_f64(bits: u64) -> bool {
    (bits & 0x7ff8_0000_0000_0000) == 0x7ff8_0000_0000_0000
}
