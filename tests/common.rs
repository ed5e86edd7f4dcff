//! Shared test helpers: a minimal WebAssembly binary emitter.
//!
//! Integration tests build real binaries section by section instead of
//! checking in fixture files; bodies are written as raw opcode bytes.

#![allow(dead_code)]

/// Value type encodings.
pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;
pub const F32: u8 = 0x7d;
pub const F64: u8 = 0x7c;

/// Unsigned LEB128.
pub fn leb(value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = value;
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            return out;
        }
    }
}

/// Signed LEB128.
pub fn sleb(value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = value;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        out.push(if done { byte } else { byte | 0x80 });
        if done {
            return out;
        }
    }
}

fn name(s: &str) -> Vec<u8> {
    let mut out = leb(s.len() as u32);
    out.extend_from_slice(s.as_bytes());
    out
}

fn limits(min: u32, max: Option<u32>) -> Vec<u8> {
    let mut out = Vec::new();
    match max {
        Some(max) => {
            out.push(1);
            out.extend(leb(min));
            out.extend(leb(max));
        }
        None => {
            out.push(0);
            out.extend(leb(min));
        }
    }
    out
}

/// An `i32.const` initializer expression.
pub fn i32_init(value: i32) -> Vec<u8> {
    let mut out = vec![0x41];
    out.extend(sleb(value as i64));
    out.push(0x0b);
    out
}

/// A `get_global` initializer expression.
pub fn get_global_init(index: u32) -> Vec<u8> {
    let mut out = vec![0x23];
    out.extend(leb(index));
    out.push(0x0b);
    out
}

/// Builds one binary module, section by section.
#[derive(Default)]
pub struct WasmBuilder {
    types: Vec<Vec<u8>>,
    imports: Vec<Vec<u8>>,
    num_imported_funcs: u32,
    funcs: Vec<u32>,
    table: Option<Vec<u8>>,
    memory: Option<Vec<u8>>,
    globals: Vec<Vec<u8>>,
    exports: Vec<Vec<u8>>,
    start: Option<u32>,
    elems: Vec<Vec<u8>>,
    code: Vec<Vec<u8>>,
    data: Vec<Vec<u8>>,
}

impl WasmBuilder {
    pub fn new() -> WasmBuilder {
        WasmBuilder::default()
    }

    /// Declare a function type, returning its index.
    pub fn add_type(&mut self, params: &[u8], results: &[u8]) -> u32 {
        let mut entry = vec![0x60];
        entry.extend(leb(params.len() as u32));
        entry.extend_from_slice(params);
        entry.extend(leb(results.len() as u32));
        entry.extend_from_slice(results);
        self.types.push(entry);
        (self.types.len() - 1) as u32
    }

    /// Import a function, returning its function index.
    pub fn import_func(&mut self, module: &str, field: &str, type_index: u32) -> u32 {
        let mut entry = name(module);
        entry.extend(name(field));
        entry.push(0x00);
        entry.extend(leb(type_index));
        self.imports.push(entry);
        self.num_imported_funcs += 1;
        self.num_imported_funcs - 1
    }

    pub fn import_table(&mut self, module: &str, field: &str, min: u32, max: Option<u32>) {
        let mut entry = name(module);
        entry.extend(name(field));
        entry.push(0x01);
        entry.push(0x70);
        entry.extend(limits(min, max));
        self.imports.push(entry);
    }

    pub fn import_memory(&mut self, module: &str, field: &str, min: u32, max: Option<u32>) {
        let mut entry = name(module);
        entry.extend(name(field));
        entry.push(0x02);
        entry.extend(limits(min, max));
        self.imports.push(entry);
    }

    pub fn import_global(&mut self, module: &str, field: &str, typ: u8, mutable: bool) {
        let mut entry = name(module);
        entry.extend(name(field));
        entry.push(0x03);
        entry.push(typ);
        entry.push(mutable as u8);
        self.imports.push(entry);
    }

    /// Declare a function with the given type, locals, and raw body bytes
    /// (without the trailing `end`; it is appended here). Returns the
    /// function index, counting imports first.
    pub fn add_func(&mut self, type_index: u32, locals: &[(u32, u8)], body: &[u8]) -> u32 {
        self.funcs.push(type_index);

        let mut code = leb(locals.len() as u32);
        for (count, typ) in locals {
            code.extend(leb(*count));
            code.push(*typ);
        }
        code.extend_from_slice(body);
        code.push(0x0b);
        self.code.push(code);

        self.num_imported_funcs + (self.funcs.len() - 1) as u32
    }

    pub fn set_table(&mut self, min: u32, max: Option<u32>) {
        let mut entry = vec![0x70];
        entry.extend(limits(min, max));
        self.table = Some(entry);
    }

    pub fn set_memory(&mut self, min: u32, max: Option<u32>) {
        self.memory = Some(limits(min, max));
    }

    pub fn add_global(&mut self, typ: u8, mutable: bool, init: Vec<u8>) {
        let mut entry = vec![typ, mutable as u8];
        entry.extend(init);
        self.globals.push(entry);
    }

    pub fn export(&mut self, field: &str, kind: u8, index: u32) {
        let mut entry = name(field);
        entry.push(kind);
        entry.extend(leb(index));
        self.exports.push(entry);
    }

    pub fn export_func(&mut self, field: &str, index: u32) {
        self.export(field, 0x00, index);
    }

    pub fn export_table(&mut self, field: &str) {
        self.export(field, 0x01, 0);
    }

    pub fn export_memory(&mut self, field: &str) {
        self.export(field, 0x02, 0);
    }

    pub fn export_global(&mut self, field: &str, index: u32) {
        self.export(field, 0x03, index);
    }

    pub fn set_start(&mut self, func_index: u32) {
        self.start = Some(func_index);
    }

    /// Element segment at a constant offset.
    pub fn add_elem(&mut self, offset: i32, funcs: &[u32]) {
        let mut entry = leb(0);
        entry.extend(i32_init(offset));
        entry.extend(leb(funcs.len() as u32));
        for func in funcs {
            entry.extend(leb(*func));
        }
        self.elems.push(entry);
    }

    /// Data segment at a constant offset.
    pub fn add_data(&mut self, offset: i32, bytes: &[u8]) {
        let mut entry = leb(0);
        entry.extend(i32_init(offset));
        entry.extend(leb(bytes.len() as u32));
        entry.extend_from_slice(bytes);
        self.data.push(entry);
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

        emit_vec_section(&mut out, 1, &self.types);
        emit_vec_section(&mut out, 2, &self.imports);
        if !self.funcs.is_empty() {
            let entries: Vec<Vec<u8>> = self.funcs.iter().map(|t| leb(*t)).collect();
            emit_vec_section(&mut out, 3, &entries);
        }
        if let Some(table) = &self.table {
            emit_vec_section(&mut out, 4, std::slice::from_ref(table));
        }
        if let Some(memory) = &self.memory {
            emit_vec_section(&mut out, 5, std::slice::from_ref(memory));
        }
        emit_vec_section(&mut out, 6, &self.globals);
        emit_vec_section(&mut out, 7, &self.exports);
        if let Some(start) = self.start {
            let payload = leb(start);
            out.push(8);
            out.extend(leb(payload.len() as u32));
            out.extend(payload);
        }
        emit_vec_section(&mut out, 9, &self.elems);
        if !self.code.is_empty() {
            let entries: Vec<Vec<u8>> = self
                .code
                .iter()
                .map(|body| {
                    let mut sized = leb(body.len() as u32);
                    sized.extend_from_slice(body);
                    sized
                })
                .collect();
            emit_vec_section(&mut out, 10, &entries);
        }
        emit_vec_section(&mut out, 11, &self.data);

        out
    }
}

fn emit_vec_section(out: &mut Vec<u8>, id: u8, entries: &[Vec<u8>]) {
    if entries.is_empty() {
        return;
    }
    let mut payload = leb(entries.len() as u32);
    for entry in entries {
        payload.extend_from_slice(entry);
    }
    out.push(id);
    out.extend(leb(payload.len() as u32));
    out.extend(payload);
}
