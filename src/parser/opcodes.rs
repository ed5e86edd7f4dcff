//! Decoded WebAssembly operators.
//!
//! [`Operator`] is the typed event emitted for each instruction in a code
//! body: the opcode plus its decoded immediates. Decoding checks structure
//! only (LEB formats, reserved bytes); operand typing is the validator's
//! job.

use crate::types::ValueType;

use super::reader::Reader;
use super::LoadError;

/// Memory access immediates. The alignment field is a hint and has no
/// effect on execution semantics; the validator still rejects alignments
/// larger than the access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

/// A single decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    // Control
    Unreachable,
    Nop,
    Block { result: Option<ValueType> },
    Loop { result: Option<ValueType> },
    If { result: Option<ValueType> },
    Else,
    End,
    Br { depth: u32 },
    BrIf { depth: u32 },
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call { func_index: u32 },
    CallIndirect { sig_index: u32 },

    // Parametric
    Drop,
    Select,

    // Variable
    GetLocal { index: u32 },
    SetLocal { index: u32 },
    TeeLocal { index: u32 },
    GetGlobal { index: u32 },
    SetGlobal { index: u32 },

    // Memory
    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I64Load8S(MemArg),
    I64Load8U(MemArg),
    I64Load16S(MemArg),
    I64Load16U(MemArg),
    I64Load32S(MemArg),
    I64Load32U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    I64Store8(MemArg),
    I64Store16(MemArg),
    I64Store32(MemArg),
    CurrentMemory,
    GrowMemory,

    // Constants (float payloads kept as raw bits)
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { bits: u32 },
    F64Const { bits: u64 },

    // i32 test/compare
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 test/compare
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // f32 compare
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,

    // f64 compare
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // i32 arithmetic
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64 arithmetic
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // f32 arithmetic
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // f64 arithmetic
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
}

fn read_block_type(reader: &mut Reader<'_>) -> Result<Option<ValueType>, LoadError> {
    let offset = reader.pos();
    let byte = reader.read_u8()?;
    if byte == 0x40 {
        Ok(None)
    } else {
        ValueType::decode(byte)
            .map(Some)
            .map_err(|m| LoadError::new(offset, m))
    }
}

fn read_mem_arg(reader: &mut Reader<'_>) -> Result<MemArg, LoadError> {
    let align = reader.read_vu32()?;
    let offset = reader.read_vu32()?;
    Ok(MemArg { align, offset })
}

fn read_reserved_zero(reader: &mut Reader<'_>, what: &str) -> Result<(), LoadError> {
    let offset = reader.pos();
    if reader.read_u8()? != 0 {
        return Err(LoadError::new(
            offset,
            format!("{what} reserved value must be 0"),
        ));
    }
    Ok(())
}

impl Operator {
    /// Decode one operator from the reader.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Operator, LoadError> {
        let offset = reader.pos();
        let opcode = reader.read_u8()?;
        let op = match opcode {
            0x00 => Operator::Unreachable,
            0x01 => Operator::Nop,
            0x02 => Operator::Block {
                result: read_block_type(reader)?,
            },
            0x03 => Operator::Loop {
                result: read_block_type(reader)?,
            },
            0x04 => Operator::If {
                result: read_block_type(reader)?,
            },
            0x05 => Operator::Else,
            0x0b => Operator::End,
            0x0c => Operator::Br {
                depth: reader.read_vu32()?,
            },
            0x0d => Operator::BrIf {
                depth: reader.read_vu32()?,
            },
            0x0e => {
                let count = reader.read_vu32()?;
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    targets.push(reader.read_vu32()?);
                }
                let default = reader.read_vu32()?;
                Operator::BrTable { targets, default }
            }
            0x0f => Operator::Return,
            0x10 => Operator::Call {
                func_index: reader.read_vu32()?,
            },
            0x11 => {
                let sig_index = reader.read_vu32()?;
                read_reserved_zero(reader, "call_indirect")?;
                Operator::CallIndirect { sig_index }
            }

            0x1a => Operator::Drop,
            0x1b => Operator::Select,

            0x20 => Operator::GetLocal {
                index: reader.read_vu32()?,
            },
            0x21 => Operator::SetLocal {
                index: reader.read_vu32()?,
            },
            0x22 => Operator::TeeLocal {
                index: reader.read_vu32()?,
            },
            0x23 => Operator::GetGlobal {
                index: reader.read_vu32()?,
            },
            0x24 => Operator::SetGlobal {
                index: reader.read_vu32()?,
            },

            0x28 => Operator::I32Load(read_mem_arg(reader)?),
            0x29 => Operator::I64Load(read_mem_arg(reader)?),
            0x2a => Operator::F32Load(read_mem_arg(reader)?),
            0x2b => Operator::F64Load(read_mem_arg(reader)?),
            0x2c => Operator::I32Load8S(read_mem_arg(reader)?),
            0x2d => Operator::I32Load8U(read_mem_arg(reader)?),
            0x2e => Operator::I32Load16S(read_mem_arg(reader)?),
            0x2f => Operator::I32Load16U(read_mem_arg(reader)?),
            0x30 => Operator::I64Load8S(read_mem_arg(reader)?),
            0x31 => Operator::I64Load8U(read_mem_arg(reader)?),
            0x32 => Operator::I64Load16S(read_mem_arg(reader)?),
            0x33 => Operator::I64Load16U(read_mem_arg(reader)?),
            0x34 => Operator::I64Load32S(read_mem_arg(reader)?),
            0x35 => Operator::I64Load32U(read_mem_arg(reader)?),
            0x36 => Operator::I32Store(read_mem_arg(reader)?),
            0x37 => Operator::I64Store(read_mem_arg(reader)?),
            0x38 => Operator::F32Store(read_mem_arg(reader)?),
            0x39 => Operator::F64Store(read_mem_arg(reader)?),
            0x3a => Operator::I32Store8(read_mem_arg(reader)?),
            0x3b => Operator::I32Store16(read_mem_arg(reader)?),
            0x3c => Operator::I64Store8(read_mem_arg(reader)?),
            0x3d => Operator::I64Store16(read_mem_arg(reader)?),
            0x3e => Operator::I64Store32(read_mem_arg(reader)?),
            0x3f => {
                read_reserved_zero(reader, "current_memory")?;
                Operator::CurrentMemory
            }
            0x40 => {
                read_reserved_zero(reader, "grow_memory")?;
                Operator::GrowMemory
            }

            0x41 => Operator::I32Const {
                value: reader.read_vs32()?,
            },
            0x42 => Operator::I64Const {
                value: reader.read_vs64()?,
            },
            0x43 => Operator::F32Const {
                bits: reader.read_f32_bits()?,
            },
            0x44 => Operator::F64Const {
                bits: reader.read_f64_bits()?,
            },

            0x45 => Operator::I32Eqz,
            0x46 => Operator::I32Eq,
            0x47 => Operator::I32Ne,
            0x48 => Operator::I32LtS,
            0x49 => Operator::I32LtU,
            0x4a => Operator::I32GtS,
            0x4b => Operator::I32GtU,
            0x4c => Operator::I32LeS,
            0x4d => Operator::I32LeU,
            0x4e => Operator::I32GeS,
            0x4f => Operator::I32GeU,

            0x50 => Operator::I64Eqz,
            0x51 => Operator::I64Eq,
            0x52 => Operator::I64Ne,
            0x53 => Operator::I64LtS,
            0x54 => Operator::I64LtU,
            0x55 => Operator::I64GtS,
            0x56 => Operator::I64GtU,
            0x57 => Operator::I64LeS,
            0x58 => Operator::I64LeU,
            0x59 => Operator::I64GeS,
            0x5a => Operator::I64GeU,

            0x5b => Operator::F32Eq,
            0x5c => Operator::F32Ne,
            0x5d => Operator::F32Lt,
            0x5e => Operator::F32Gt,
            0x5f => Operator::F32Le,
            0x60 => Operator::F32Ge,

            0x61 => Operator::F64Eq,
            0x62 => Operator::F64Ne,
            0x63 => Operator::F64Lt,
            0x64 => Operator::F64Gt,
            0x65 => Operator::F64Le,
            0x66 => Operator::F64Ge,

            0x67 => Operator::I32Clz,
            0x68 => Operator::I32Ctz,
            0x69 => Operator::I32Popcnt,
            0x6a => Operator::I32Add,
            0x6b => Operator::I32Sub,
            0x6c => Operator::I32Mul,
            0x6d => Operator::I32DivS,
            0x6e => Operator::I32DivU,
            0x6f => Operator::I32RemS,
            0x70 => Operator::I32RemU,
            0x71 => Operator::I32And,
            0x72 => Operator::I32Or,
            0x73 => Operator::I32Xor,
            0x74 => Operator::I32Shl,
            0x75 => Operator::I32ShrS,
            0x76 => Operator::I32ShrU,
            0x77 => Operator::I32Rotl,
            0x78 => Operator::I32Rotr,

            0x79 => Operator::I64Clz,
            0x7a => Operator::I64Ctz,
            0x7b => Operator::I64Popcnt,
            0x7c => Operator::I64Add,
            0x7d => Operator::I64Sub,
            0x7e => Operator::I64Mul,
            0x7f => Operator::I64DivS,
            0x80 => Operator::I64DivU,
            0x81 => Operator::I64RemS,
            0x82 => Operator::I64RemU,
            0x83 => Operator::I64And,
            0x84 => Operator::I64Or,
            0x85 => Operator::I64Xor,
            0x86 => Operator::I64Shl,
            0x87 => Operator::I64ShrS,
            0x88 => Operator::I64ShrU,
            0x89 => Operator::I64Rotl,
            0x8a => Operator::I64Rotr,

            0x8b => Operator::F32Abs,
            0x8c => Operator::F32Neg,
            0x8d => Operator::F32Ceil,
            0x8e => Operator::F32Floor,
            0x8f => Operator::F32Trunc,
            0x90 => Operator::F32Nearest,
            0x91 => Operator::F32Sqrt,
            0x92 => Operator::F32Add,
            0x93 => Operator::F32Sub,
            0x94 => Operator::F32Mul,
            0x95 => Operator::F32Div,
            0x96 => Operator::F32Min,
            0x97 => Operator::F32Max,
            0x98 => Operator::F32Copysign,

            0x99 => Operator::F64Abs,
            0x9a => Operator::F64Neg,
            0x9b => Operator::F64Ceil,
            0x9c => Operator::F64Floor,
            0x9d => Operator::F64Trunc,
            0x9e => Operator::F64Nearest,
            0x9f => Operator::F64Sqrt,
            0xa0 => Operator::F64Add,
            0xa1 => Operator::F64Sub,
            0xa2 => Operator::F64Mul,
            0xa3 => Operator::F64Div,
            0xa4 => Operator::F64Min,
            0xa5 => Operator::F64Max,
            0xa6 => Operator::F64Copysign,

            0xa7 => Operator::I32WrapI64,
            0xa8 => Operator::I32TruncF32S,
            0xa9 => Operator::I32TruncF32U,
            0xaa => Operator::I32TruncF64S,
            0xab => Operator::I32TruncF64U,
            0xac => Operator::I64ExtendI32S,
            0xad => Operator::I64ExtendI32U,
            0xae => Operator::I64TruncF32S,
            0xaf => Operator::I64TruncF32U,
            0xb0 => Operator::I64TruncF64S,
            0xb1 => Operator::I64TruncF64U,
            0xb2 => Operator::F32ConvertI32S,
            0xb3 => Operator::F32ConvertI32U,
            0xb4 => Operator::F32ConvertI64S,
            0xb5 => Operator::F32ConvertI64U,
            0xb6 => Operator::F32DemoteF64,
            0xb7 => Operator::F64ConvertI32S,
            0xb8 => Operator::F64ConvertI32U,
            0xb9 => Operator::F64ConvertI64S,
            0xba => Operator::F64ConvertI64U,
            0xbb => Operator::F64PromoteF32,
            0xbc => Operator::I32ReinterpretF32,
            0xbd => Operator::I64ReinterpretF64,
            0xbe => Operator::F32ReinterpretI32,
            0xbf => Operator::F64ReinterpretI64,

            b => {
                return Err(LoadError::new(offset, format!("unexpected opcode: 0x{b:02x}")));
            }
        };
        Ok(op)
    }

    /// The canonical instruction name, used in validation errors and
    /// disassembly.
    pub fn mnemonic(&self) -> &'static str {
        use Operator::*;
        match self {
            Unreachable => "unreachable",
            Nop => "nop",
            Block { .. } => "block",
            Loop { .. } => "loop",
            If { .. } => "if",
            Else => "else",
            End => "end",
            Br { .. } => "br",
            BrIf { .. } => "br_if",
            BrTable { .. } => "br_table",
            Return => "return",
            Call { .. } => "call",
            CallIndirect { .. } => "call_indirect",
            Drop => "drop",
            Select => "select",
            GetLocal { .. } => "get_local",
            SetLocal { .. } => "set_local",
            TeeLocal { .. } => "tee_local",
            GetGlobal { .. } => "get_global",
            SetGlobal { .. } => "set_global",
            I32Load(_) => "i32.load",
            I64Load(_) => "i64.load",
            F32Load(_) => "f32.load",
            F64Load(_) => "f64.load",
            I32Load8S(_) => "i32.load8_s",
            I32Load8U(_) => "i32.load8_u",
            I32Load16S(_) => "i32.load16_s",
            I32Load16U(_) => "i32.load16_u",
            I64Load8S(_) => "i64.load8_s",
            I64Load8U(_) => "i64.load8_u",
            I64Load16S(_) => "i64.load16_s",
            I64Load16U(_) => "i64.load16_u",
            I64Load32S(_) => "i64.load32_s",
            I64Load32U(_) => "i64.load32_u",
            I32Store(_) => "i32.store",
            I64Store(_) => "i64.store",
            F32Store(_) => "f32.store",
            F64Store(_) => "f64.store",
            I32Store8(_) => "i32.store8",
            I32Store16(_) => "i32.store16",
            I64Store8(_) => "i64.store8",
            I64Store16(_) => "i64.store16",
            I64Store32(_) => "i64.store32",
            CurrentMemory => "current_memory",
            GrowMemory => "grow_memory",
            I32Const { .. } => "i32.const",
            I64Const { .. } => "i64.const",
            F32Const { .. } => "f32.const",
            F64Const { .. } => "f64.const",
            I32Eqz => "i32.eqz",
            I32Eq => "i32.eq",
            I32Ne => "i32.ne",
            I32LtS => "i32.lt_s",
            I32LtU => "i32.lt_u",
            I32GtS => "i32.gt_s",
            I32GtU => "i32.gt_u",
            I32LeS => "i32.le_s",
            I32LeU => "i32.le_u",
            I32GeS => "i32.ge_s",
            I32GeU => "i32.ge_u",
            I64Eqz => "i64.eqz",
            I64Eq => "i64.eq",
            I64Ne => "i64.ne",
            I64LtS => "i64.lt_s",
            I64LtU => "i64.lt_u",
            I64GtS => "i64.gt_s",
            I64GtU => "i64.gt_u",
            I64LeS => "i64.le_s",
            I64LeU => "i64.le_u",
            I64GeS => "i64.ge_s",
            I64GeU => "i64.ge_u",
            F32Eq => "f32.eq",
            F32Ne => "f32.ne",
            F32Lt => "f32.lt",
            F32Gt => "f32.gt",
            F32Le => "f32.le",
            F32Ge => "f32.ge",
            F64Eq => "f64.eq",
            F64Ne => "f64.ne",
            F64Lt => "f64.lt",
            F64Gt => "f64.gt",
            F64Le => "f64.le",
            F64Ge => "f64.ge",
            I32Clz => "i32.clz",
            I32Ctz => "i32.ctz",
            I32Popcnt => "i32.popcnt",
            I32Add => "i32.add",
            I32Sub => "i32.sub",
            I32Mul => "i32.mul",
            I32DivS => "i32.div_s",
            I32DivU => "i32.div_u",
            I32RemS => "i32.rem_s",
            I32RemU => "i32.rem_u",
            I32And => "i32.and",
            I32Or => "i32.or",
            I32Xor => "i32.xor",
            I32Shl => "i32.shl",
            I32ShrS => "i32.shr_s",
            I32ShrU => "i32.shr_u",
            I32Rotl => "i32.rotl",
            I32Rotr => "i32.rotr",
            I64Clz => "i64.clz",
            I64Ctz => "i64.ctz",
            I64Popcnt => "i64.popcnt",
            I64Add => "i64.add",
            I64Sub => "i64.sub",
            I64Mul => "i64.mul",
            I64DivS => "i64.div_s",
            I64DivU => "i64.div_u",
            I64RemS => "i64.rem_s",
            I64RemU => "i64.rem_u",
            I64And => "i64.and",
            I64Or => "i64.or",
            I64Xor => "i64.xor",
            I64Shl => "i64.shl",
            I64ShrS => "i64.shr_s",
            I64ShrU => "i64.shr_u",
            I64Rotl => "i64.rotl",
            I64Rotr => "i64.rotr",
            F32Abs => "f32.abs",
            F32Neg => "f32.neg",
            F32Ceil => "f32.ceil",
            F32Floor => "f32.floor",
            F32Trunc => "f32.trunc",
            F32Nearest => "f32.nearest",
            F32Sqrt => "f32.sqrt",
            F32Add => "f32.add",
            F32Sub => "f32.sub",
            F32Mul => "f32.mul",
            F32Div => "f32.div",
            F32Min => "f32.min",
            F32Max => "f32.max",
            F32Copysign => "f32.copysign",
            F64Abs => "f64.abs",
            F64Neg => "f64.neg",
            F64Ceil => "f64.ceil",
            F64Floor => "f64.floor",
            F64Trunc => "f64.trunc",
            F64Nearest => "f64.nearest",
            F64Sqrt => "f64.sqrt",
            F64Add => "f64.add",
            F64Sub => "f64.sub",
            F64Mul => "f64.mul",
            F64Div => "f64.div",
            F64Min => "f64.min",
            F64Max => "f64.max",
            F64Copysign => "f64.copysign",
            I32WrapI64 => "i32.wrap/i64",
            I32TruncF32S => "i32.trunc_s/f32",
            I32TruncF32U => "i32.trunc_u/f32",
            I32TruncF64S => "i32.trunc_s/f64",
            I32TruncF64U => "i32.trunc_u/f64",
            I64ExtendI32S => "i64.extend_s/i32",
            I64ExtendI32U => "i64.extend_u/i32",
            I64TruncF32S => "i64.trunc_s/f32",
            I64TruncF32U => "i64.trunc_u/f32",
            I64TruncF64S => "i64.trunc_s/f64",
            I64TruncF64U => "i64.trunc_u/f64",
            F32ConvertI32S => "f32.convert_s/i32",
            F32ConvertI32U => "f32.convert_u/i32",
            F32ConvertI64S => "f32.convert_s/i64",
            F32ConvertI64U => "f32.convert_u/i64",
            F32DemoteF64 => "f32.demote/f64",
            F64ConvertI32S => "f64.convert_s/i32",
            F64ConvertI32U => "f64.convert_u/i32",
            F64ConvertI64S => "f64.convert_s/i64",
            F64ConvertI64U => "f64.convert_u/i64",
            F64PromoteF32 => "f64.promote/f32",
            I32ReinterpretF32 => "i32.reinterpret/f32",
            I64ReinterpretF64 => "i64.reinterpret/f64",
            F32ReinterpretI32 => "f32.reinterpret/i32",
            F64ReinterpretI64 => "f64.reinterpret/i64",
        }
    }
}
