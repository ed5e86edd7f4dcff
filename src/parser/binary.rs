//! Section-by-section module decoding.
//!
//! [`read_module`] walks the binary sections in order and drives a
//! [`ModuleVisitor`] with typed events. Index operands that refer to
//! section-level declarations (signature indices, export targets, segment
//! targets) are bounds-checked against the declared counts here; everything
//! type-level is left to the visitor.

use log::debug;

use crate::types::{ExternalKind, Limits, ValueType};

use super::opcodes::Operator;
use super::reader::Reader;
use super::LoadError;

const WASM_MAGIC: u32 = 0x6d73_6100; // "\0asm"
const WASM_VERSION: u32 = 1;

/// Largest addressable memory size: 65 536 pages of 64 KiB.
pub const MAX_PAGES: u32 = 65536;

/// A constant initializer expression for globals and segment offsets.
/// Evaluated at instantiation time; float payloads are raw bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    GetGlobal(u32),
}

/// Receiver for decoding events.
///
/// Callbacks are invoked in binary section order; `offset` is the byte
/// offset of the entry being reported, for error messages.
pub trait ModuleVisitor {
    fn on_signature(
        &mut self,
        params: Vec<ValueType>,
        results: Vec<ValueType>,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_import_func(
        &mut self,
        module: String,
        field: String,
        sig_index: u32,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_import_table(
        &mut self,
        module: String,
        field: String,
        limits: Limits,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_import_memory(
        &mut self,
        module: String,
        field: String,
        limits: Limits,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_import_global(
        &mut self,
        module: String,
        field: String,
        typ: ValueType,
        mutable: bool,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_function(&mut self, sig_index: u32, offset: usize) -> Result<(), LoadError>;

    fn on_table(&mut self, limits: Limits, offset: usize) -> Result<(), LoadError>;

    fn on_memory(&mut self, limits: Limits, offset: usize) -> Result<(), LoadError>;

    fn on_global(
        &mut self,
        typ: ValueType,
        mutable: bool,
        init: InitExpr,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_export(
        &mut self,
        name: String,
        kind: ExternalKind,
        index: u32,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_start(&mut self, func_index: u32, offset: usize) -> Result<(), LoadError>;

    fn on_elem_segment(
        &mut self,
        table_index: u32,
        init: InitExpr,
        func_indices: Vec<u32>,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn begin_function_body(
        &mut self,
        index: u32,
        locals: Vec<(u32, ValueType)>,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn on_operator(&mut self, op: Operator, offset: usize) -> Result<(), LoadError>;

    fn end_function_body(&mut self, offset: usize) -> Result<(), LoadError>;

    fn on_data_segment(
        &mut self,
        memory_index: u32,
        init: InitExpr,
        data: Vec<u8>,
        offset: usize,
    ) -> Result<(), LoadError>;

    fn end_module(&mut self, offset: usize) -> Result<(), LoadError>;
}

/// Counts of declared entities, used to bounds-check index operands while
/// the sections that reference them are decoded.
#[derive(Default)]
struct Counts {
    types: u32,
    funcs: u32,
    imported_funcs: u32,
    tables: u32,
    memories: u32,
    globals: u32,
}

/// Decode a binary module, driving the visitor with one event per entry.
pub fn read_module<V: ModuleVisitor>(bytes: &[u8], visitor: &mut V) -> Result<(), LoadError> {
    let mut reader = Reader::new(bytes);

    if reader.read_u32()? != WASM_MAGIC {
        return Err(LoadError::new(0, "bad magic value"));
    }
    let version = reader.read_u32()?;
    if version != WASM_VERSION {
        return Err(LoadError::new(
            4,
            format!("bad wasm file version: 0x{version:x} (expected 0x1)"),
        ));
    }

    let mut counts = Counts::default();
    let mut last_section_id: u8 = 0;
    let mut seen_code_section = false;

    while !reader.at_end() {
        let section_offset = reader.pos();
        let id = reader.read_u8()?;
        let len = reader.read_vu32()? as usize;
        if reader.remaining() < len {
            return Err(LoadError::new(
                section_offset,
                "section extends past end of input",
            ));
        }
        let section_end = reader.pos() + len;

        if id == 0 {
            // Custom section: validate the name, skip the payload.
            let name = reader.read_string()?;
            debug!("skipping custom section '{name}', {len} bytes");
            if reader.pos() > section_end {
                return Err(LoadError::new(section_offset, "section size mismatch"));
            }
            let skip = section_end - reader.pos();
            reader.read_bytes(skip)?;
            continue;
        }

        if id > 11 {
            return Err(LoadError::new(
                section_offset,
                format!("invalid section id: {id}"),
            ));
        }
        if id <= last_section_id {
            return Err(LoadError::new(
                section_offset,
                format!("section id {id} out of order"),
            ));
        }
        last_section_id = id;

        debug!("section #{id}, {len} bytes");
        match id {
            1 => read_type_section(&mut reader, visitor, &mut counts)?,
            2 => read_import_section(&mut reader, visitor, &mut counts)?,
            3 => read_function_section(&mut reader, visitor, &mut counts)?,
            4 => read_table_section(&mut reader, visitor, &mut counts)?,
            5 => read_memory_section(&mut reader, visitor, &mut counts)?,
            6 => read_global_section(&mut reader, visitor, &mut counts)?,
            7 => read_export_section(&mut reader, visitor, &counts)?,
            8 => read_start_section(&mut reader, visitor, &counts)?,
            9 => read_elem_section(&mut reader, visitor, &counts)?,
            10 => {
                seen_code_section = true;
                read_code_section(&mut reader, visitor, &counts)?;
            }
            11 => read_data_section(&mut reader, visitor, &counts)?,
            _ => unreachable!(),
        }

        if reader.pos() != section_end {
            return Err(LoadError::new(section_offset, "section size mismatch"));
        }
    }

    if counts.funcs > counts.imported_funcs && !seen_code_section {
        return Err(LoadError::new(
            reader.pos(),
            "function signature count != function body count",
        ));
    }

    visitor.end_module(reader.pos())
}

fn read_limits(reader: &mut Reader<'_>) -> Result<Limits, LoadError> {
    let offset = reader.pos();
    let flags = reader.read_vu32()?;
    if flags > 1 {
        return Err(LoadError::new(offset, format!("invalid limits flags: {flags}")));
    }
    let initial = reader.read_vu32()?;
    let max = if flags == 1 {
        let max = reader.read_vu32()?;
        if initial > max {
            return Err(LoadError::new(
                offset,
                "size minimum must not be greater than maximum",
            ));
        }
        Some(max)
    } else {
        None
    };
    Ok(Limits { initial, max })
}

fn read_memory_limits(reader: &mut Reader<'_>) -> Result<Limits, LoadError> {
    let offset = reader.pos();
    let limits = read_limits(reader)?;
    if limits.initial > MAX_PAGES || limits.max.is_some_and(|max| max > MAX_PAGES) {
        return Err(LoadError::new(
            offset,
            format!("memory size must be at most {MAX_PAGES} pages"),
        ));
    }
    Ok(limits)
}

fn read_table_elem_type(reader: &mut Reader<'_>) -> Result<(), LoadError> {
    let offset = reader.pos();
    if reader.read_u8()? != 0x70 {
        return Err(LoadError::new(offset, "expected funcref table element type"));
    }
    Ok(())
}

fn read_value_type(reader: &mut Reader<'_>) -> Result<ValueType, LoadError> {
    let offset = reader.pos();
    let byte = reader.read_u8()?;
    ValueType::decode(byte).map_err(|m| LoadError::new(offset, m))
}

fn read_mutability(reader: &mut Reader<'_>) -> Result<bool, LoadError> {
    let offset = reader.pos();
    match reader.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(LoadError::new(offset, format!("invalid mutability: {b}"))),
    }
}

fn read_init_expr(reader: &mut Reader<'_>) -> Result<InitExpr, LoadError> {
    let offset = reader.pos();
    let init = match Operator::decode(reader)? {
        Operator::I32Const { value } => InitExpr::I32Const(value),
        Operator::I64Const { value } => InitExpr::I64Const(value),
        Operator::F32Const { bits } => InitExpr::F32Const(bits),
        Operator::F64Const { bits } => InitExpr::F64Const(bits),
        Operator::GetGlobal { index } => InitExpr::GetGlobal(index),
        op => {
            return Err(LoadError::new(
                offset,
                format!("unexpected operator in initializer expression: {}", op.mnemonic()),
            ));
        }
    };
    let end_offset = reader.pos();
    if Operator::decode(reader)? != Operator::End {
        return Err(LoadError::new(
            end_offset,
            "expected end of initializer expression",
        ));
    }
    Ok(init)
}

fn read_type_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &mut Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        if reader.read_u8()? != 0x60 {
            return Err(LoadError::new(offset, "expected function type form 0x60"));
        }
        let mut params = Vec::new();
        for _ in 0..reader.read_vu32()? {
            params.push(read_value_type(reader)?);
        }
        let mut results = Vec::new();
        for _ in 0..reader.read_vu32()? {
            results.push(read_value_type(reader)?);
        }
        visitor.on_signature(params, results, offset)?;
        counts.types += 1;
    }
    Ok(())
}

fn read_import_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &mut Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let module = reader.read_string()?;
        let field = reader.read_string()?;
        let kind_offset = reader.pos();
        let kind = ExternalKind::decode(reader.read_u8()?)
            .map_err(|m| LoadError::new(kind_offset, m))?;
        match kind {
            ExternalKind::Func => {
                let sig_index = reader.read_vu32()?;
                if sig_index >= counts.types {
                    return Err(LoadError::new(
                        offset,
                        format!("invalid signature index: {sig_index}"),
                    ));
                }
                visitor.on_import_func(module, field, sig_index, offset)?;
                counts.funcs += 1;
                counts.imported_funcs += 1;
            }
            ExternalKind::Table => {
                read_table_elem_type(reader)?;
                let limits = read_limits(reader)?;
                check_single(counts.tables, "table", offset)?;
                visitor.on_import_table(module, field, limits, offset)?;
                counts.tables += 1;
            }
            ExternalKind::Memory => {
                let limits = read_memory_limits(reader)?;
                check_single(counts.memories, "memory", offset)?;
                visitor.on_import_memory(module, field, limits, offset)?;
                counts.memories += 1;
            }
            ExternalKind::Global => {
                let typ = read_value_type(reader)?;
                let mutable = read_mutability(reader)?;
                visitor.on_import_global(module, field, typ, mutable, offset)?;
                counts.globals += 1;
            }
        }
    }
    Ok(())
}

fn check_single(current: u32, what: &str, offset: usize) -> Result<(), LoadError> {
    if current > 0 {
        return Err(LoadError::new(
            offset,
            format!("{what} count must be 0 or 1"),
        ));
    }
    Ok(())
}

fn read_function_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &mut Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let sig_index = reader.read_vu32()?;
        if sig_index >= counts.types {
            return Err(LoadError::new(
                offset,
                format!("invalid signature index: {sig_index}"),
            ));
        }
        visitor.on_function(sig_index, offset)?;
        counts.funcs += 1;
    }
    Ok(())
}

fn read_table_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &mut Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        read_table_elem_type(reader)?;
        let limits = read_limits(reader)?;
        check_single(counts.tables, "table", offset)?;
        visitor.on_table(limits, offset)?;
        counts.tables += 1;
    }
    Ok(())
}

fn read_memory_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &mut Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let limits = read_memory_limits(reader)?;
        check_single(counts.memories, "memory", offset)?;
        visitor.on_memory(limits, offset)?;
        counts.memories += 1;
    }
    Ok(())
}

fn read_global_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &mut Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let typ = read_value_type(reader)?;
        let mutable = read_mutability(reader)?;
        let init = read_init_expr(reader)?;
        visitor.on_global(typ, mutable, init, offset)?;
        counts.globals += 1;
    }
    Ok(())
}

fn read_export_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let name = reader.read_string()?;
        let kind_offset = reader.pos();
        let kind = ExternalKind::decode(reader.read_u8()?)
            .map_err(|m| LoadError::new(kind_offset, m))?;
        let index = reader.read_vu32()?;
        let declared = match kind {
            ExternalKind::Func => counts.funcs,
            ExternalKind::Table => counts.tables,
            ExternalKind::Memory => counts.memories,
            ExternalKind::Global => counts.globals,
        };
        if index >= declared {
            return Err(LoadError::new(
                offset,
                format!("invalid export {kind} index: {index}"),
            ));
        }
        visitor.on_export(name, kind, index, offset)?;
    }
    Ok(())
}

fn read_start_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &Counts,
) -> Result<(), LoadError> {
    let offset = reader.pos();
    let func_index = reader.read_vu32()?;
    if func_index >= counts.funcs {
        return Err(LoadError::new(
            offset,
            format!("invalid start function index: {func_index}"),
        ));
    }
    visitor.on_start(func_index, offset)
}

fn read_elem_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let table_index = reader.read_vu32()?;
        if table_index >= counts.tables {
            return Err(LoadError::new(
                offset,
                format!("invalid table index: {table_index}"),
            ));
        }
        let init = read_init_expr(reader)?;
        let num_funcs = reader.read_vu32()?;
        let mut func_indices = Vec::with_capacity(num_funcs as usize);
        for _ in 0..num_funcs {
            let func_offset = reader.pos();
            let func_index = reader.read_vu32()?;
            if func_index >= counts.funcs {
                return Err(LoadError::new(
                    func_offset,
                    format!("invalid function index: {func_index}"),
                ));
            }
            func_indices.push(func_index);
        }
        visitor.on_elem_segment(table_index, init, func_indices, offset)?;
    }
    Ok(())
}

fn read_code_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &Counts,
) -> Result<(), LoadError> {
    let section_offset = reader.pos();
    let count = reader.read_vu32()?;
    if count != counts.funcs - counts.imported_funcs {
        return Err(LoadError::new(
            section_offset,
            "function signature count != function body count",
        ));
    }

    for index in 0..count {
        let body_offset = reader.pos();
        let size = reader.read_vu32()? as usize;
        if reader.remaining() < size {
            return Err(LoadError::new(
                body_offset,
                "function body extends past end of section",
            ));
        }
        let body_end = reader.pos() + size;

        let mut total_locals: u64 = 0;
        let mut locals = Vec::new();
        for _ in 0..reader.read_vu32()? {
            let local_count = reader.read_vu32()?;
            let typ = read_value_type(reader)?;
            total_locals += local_count as u64;
            if total_locals > u32::MAX as u64 {
                return Err(LoadError::new(body_offset, "too many locals"));
            }
            locals.push((local_count, typ));
        }
        visitor.begin_function_body(counts.imported_funcs + index, locals, body_offset)?;

        let mut depth: u32 = 0;
        loop {
            let op_offset = reader.pos();
            if op_offset >= body_end {
                return Err(LoadError::new(body_offset, "unexpected end of function body"));
            }
            let op = Operator::decode(reader)?;
            match &op {
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => depth += 1,
                Operator::End => {
                    if depth == 0 {
                        visitor.on_operator(op, op_offset)?;
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            visitor.on_operator(op, op_offset)?;
        }

        if reader.pos() != body_end {
            return Err(LoadError::new(body_offset, "function body size mismatch"));
        }
        visitor.end_function_body(reader.pos())?;
    }
    Ok(())
}

fn read_data_section<V: ModuleVisitor>(
    reader: &mut Reader<'_>,
    visitor: &mut V,
    counts: &Counts,
) -> Result<(), LoadError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        let offset = reader.pos();
        let memory_index = reader.read_vu32()?;
        if memory_index >= counts.memories {
            return Err(LoadError::new(
                offset,
                format!("invalid memory index: {memory_index}"),
            ));
        }
        let init = read_init_expr(reader)?;
        let len = reader.read_vu32()? as usize;
        let data = reader.read_bytes(len)?.to_vec();
        visitor.on_data_segment(memory_index, init, data, offset)?;
    }
    Ok(())
}
