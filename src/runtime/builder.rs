//! The validating module builder.
//!
//! Consumes the binary reader's events and simultaneously enforces
//! validation and constructs the executable image in the environment.
//! Function bodies are checked against a symbolic operand stack (with a
//! polymorphic `Any` entry for unreachable code) and a stack of control
//! labels, while the same pass lowers the body into the flat instruction
//! stream: nested blocks disappear and every branch becomes a resolved
//! [`BranchTarget`] carrying the operand-stack fixup it must perform.
//!
//! Loading is transactional: [`read_binary`] marks the environment on
//! entry and rolls back on any failure, so no partially built module is
//! ever observable.

use std::rc::Rc;

use log::info;

use crate::parser::{self, InitExpr, LoadError, MemArg, ModuleVisitor, Operator};
use crate::types::{ExternalKind, FuncSignature, Limits, ValueType};

use super::code::{BranchTarget, Instr};
use super::env::{
    DefinedFunc, DefinedModule, Environment, Export, Func, Global, HostFunc, Module,
};
use super::host::ImportDesc;
use super::memory::Memory;
use super::table::Table;
use super::value::Value;

/// Load a binary module into the environment, returning its module index.
///
/// On any failure (malformed, invalid, or unlinkable input) the
/// environment is reset to its state before the call.
pub fn read_binary(
    env: &mut Environment,
    name: Option<&str>,
    bytes: &[u8],
) -> Result<usize, LoadError> {
    let mark = env.mark();
    let mut builder = ModuleBuilder::new(env, name);
    match parser::read_module(bytes, &mut builder) {
        Ok(()) => {
            let index = builder.module_index;
            if let Some(name) = name {
                env.bind_module(name, index);
            }
            info!("loaded module {:?} as #{index}", name.unwrap_or("<unnamed>"));
            Ok(index)
        }
        Err(err) => {
            env.reset_to_mark(mark);
            Err(err)
        }
    }
}

/// A symbolic operand stack entry: a known type, or the polymorphic
/// value that unreachable code produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Any,
    V(ValueType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

/// A position in the instruction stream whose branch target is patched
/// when the label it refers to is closed.
enum FixupRef {
    Instr(usize),
    TableTarget { pos: usize, slot: usize },
    TableDefault { pos: usize },
}

struct Label {
    kind: LabelKind,
    result: Option<ValueType>,
    /// Operand stack height at entry.
    height: usize,
    /// Set once control cannot reach the current point; pops below
    /// `height` then produce `Any` instead of underflowing.
    unreachable: bool,
    fixups: Vec<FixupRef>,
    /// Branch target for loops (the pc at entry).
    loop_pc: usize,
    /// The `br_unless` emitted for `if`, patched at `else`/`end`.
    else_fixup: Option<usize>,
}

impl Label {
    fn branch_arity(&self) -> u32 {
        if self.kind == LabelKind::Loop {
            0
        } else {
            self.result.is_some() as u32
        }
    }

    fn branch_type(&self) -> Option<ValueType> {
        if self.kind == LabelKind::Loop {
            None
        } else {
            self.result
        }
    }
}

struct PendingElemSegment {
    table_index: usize,
    init: InitExpr,
    func_indices: Vec<usize>,
    offset: usize,
}

struct PendingDataSegment {
    memory_index: usize,
    init: InitExpr,
    data: Vec<u8>,
    offset: usize,
}

struct ModuleBuilder<'a> {
    env: &'a mut Environment,
    name: Option<String>,
    /// Index this module will occupy once pushed.
    module_index: usize,

    sigs: Vec<FuncSignature>,
    /// Module function space (imports first) as environment indices.
    func_indices: Vec<usize>,
    table_index: Option<usize>,
    memory_index: Option<usize>,
    global_indices: Vec<usize>,
    num_imported_globals: usize,
    exports: Vec<Export>,
    start_func: Option<usize>,
    elem_segments: Vec<PendingElemSegment>,
    data_segments: Vec<PendingDataSegment>,

    // Per-body validation and lowering state.
    current_func: usize,
    current_sig: FuncSignature,
    locals: Vec<ValueType>,
    code: Vec<Instr>,
    type_stack: Vec<Ty>,
    labels: Vec<Label>,
    op_offset: usize,
}

impl<'a> ModuleBuilder<'a> {
    fn new(env: &'a mut Environment, name: Option<&str>) -> ModuleBuilder<'a> {
        let module_index = env.module_count();
        ModuleBuilder {
            env,
            name: name.map(str::to_string),
            module_index,
            sigs: Vec::new(),
            func_indices: Vec::new(),
            table_index: None,
            memory_index: None,
            global_indices: Vec::new(),
            num_imported_globals: 0,
            exports: Vec::new(),
            start_func: None,
            elem_segments: Vec::new(),
            data_segments: Vec::new(),
            current_func: 0,
            current_sig: FuncSignature::default(),
            locals: Vec::new(),
            code: Vec::new(),
            type_stack: Vec::new(),
            labels: Vec::new(),
            op_offset: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> LoadError {
        LoadError::new(self.op_offset, message)
    }

    // ---- import resolution ----------------------------------------------

    fn resolve_import_module(&self, module: &str, offset: usize) -> Result<usize, LoadError> {
        self.env
            .find_registered_module(module)
            .ok_or_else(|| LoadError::new(offset, format!("unknown import module \"{module}\"")))
    }

    fn find_import_export(
        &self,
        module_index: usize,
        field: &str,
        kind: ExternalKind,
        offset: usize,
    ) -> Result<Option<Export>, LoadError> {
        match self.env.module(module_index).find_export(field) {
            None => match self.env.module(module_index) {
                // A host module may still create the entity on demand.
                Module::Host(_) => Ok(None),
                Module::Defined(_) => Err(LoadError::new(
                    offset,
                    format!("unknown module field \"{field}\""),
                )),
            },
            Some(export) => {
                if export.kind != kind {
                    return Err(LoadError::new(
                        offset,
                        format!(
                            "import kind mismatch for \"{field}\": expected {kind}, got {}",
                            export.kind
                        ),
                    ));
                }
                Ok(Some(export.clone()))
            }
        }
    }

    fn check_import_limits(
        actual: &Limits,
        declared: &Limits,
        offset: usize,
    ) -> Result<(), LoadError> {
        if actual.initial < declared.initial {
            return Err(LoadError::new(
                offset,
                format!(
                    "actual size ({}) smaller than declared ({})",
                    actual.initial, declared.initial
                ),
            ));
        }
        if let Some(declared_max) = declared.max {
            match actual.max {
                None => {
                    return Err(LoadError::new(
                        offset,
                        format!("unspecified max size larger than declared ({declared_max})"),
                    ));
                }
                Some(actual_max) if actual_max > declared_max => {
                    return Err(LoadError::new(
                        offset,
                        format!("max size ({actual_max}) larger than declared ({declared_max})"),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Evaluate a constant initializer. `get_global` may only reference an
    /// imported (and therefore immutable) global.
    fn eval_init(
        &self,
        init: InitExpr,
        expected: ValueType,
        desc: &str,
        offset: usize,
    ) -> Result<Value, LoadError> {
        let value = match init {
            InitExpr::I32Const(v) => Value::I32(v),
            InitExpr::I64Const(v) => Value::I64(v),
            InitExpr::F32Const(bits) => Value::F32(f32::from_bits(bits)),
            InitExpr::F64Const(bits) => Value::F64(f64::from_bits(bits)),
            InitExpr::GetGlobal(index) => {
                if index as usize >= self.num_imported_globals {
                    return Err(LoadError::new(
                        offset,
                        "initializer expression can only reference an imported global",
                    ));
                }
                self.env.global(self.global_indices[index as usize]).value
            }
        };
        if value.typ() != expected {
            return Err(LoadError::new(
                offset,
                format!(
                    "type mismatch in {desc}, expected {expected} but got {}",
                    value.typ()
                ),
            ));
        }
        Ok(value)
    }

    // ---- symbolic operand stack ------------------------------------------

    fn top_label(&self) -> &Label {
        self.labels.last().expect("label stack is never empty")
    }

    fn top_label_mut(&mut self) -> &mut Label {
        self.labels.last_mut().expect("label stack is never empty")
    }

    fn push_type(&mut self, ty: ValueType) {
        self.type_stack.push(Ty::V(ty));
    }

    /// Check that `needed` operands are available above the current label,
    /// unless the stack is polymorphic.
    fn check_operand_count(&self, desc: &str, needed: usize) -> Result<(), LoadError> {
        let label = self.top_label();
        if label.unreachable {
            return Ok(());
        }
        let available = self.type_stack.len().saturating_sub(label.height);
        if available < needed {
            return Err(self.error(format!(
                "type stack size too small at {desc}. got {available}, expected at least {needed}"
            )));
        }
        Ok(())
    }

    /// Pop one entry, producing `Any` below the label boundary of
    /// unreachable code.
    fn pop_any(&mut self, desc: &str) -> Result<Ty, LoadError> {
        let label = self.top_label();
        if self.type_stack.len() == label.height {
            if label.unreachable {
                return Ok(Ty::Any);
            }
            return Err(self.error(format!(
                "type stack size too small at {desc}. got 0, expected at least 1"
            )));
        }
        Ok(self.type_stack.pop().expect("height checked above"))
    }

    /// Pop `expected` (last element popped first), checking each type.
    fn pop_expecteds(&mut self, desc: &str, expected: &[ValueType]) -> Result<(), LoadError> {
        self.check_operand_count(desc, expected.len())?;
        for want in expected.iter().rev() {
            let got = self.pop_any(desc)?;
            if let Ty::V(actual) = got {
                if actual != *want {
                    return Err(self.error(format!(
                        "type mismatch in {desc}, expected {want} but got {actual}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn pop_expected(&mut self, desc: &str, expected: ValueType) -> Result<(), LoadError> {
        self.pop_expecteds(desc, &[expected])
    }

    /// Mark the rest of the current block unreachable and make its stack
    /// polymorphic.
    fn set_unreachable(&mut self) {
        let height = self.top_label().height;
        self.type_stack.truncate(height);
        self.top_label_mut().unreachable = true;
    }

    // ---- labels and branches ---------------------------------------------

    fn push_label(&mut self, kind: LabelKind, result: Option<ValueType>) {
        self.labels.push(Label {
            kind,
            result,
            height: self.type_stack.len(),
            unreachable: false,
            fixups: Vec::new(),
            loop_pc: self.code.len(),
            else_fixup: None,
        });
    }

    fn label_at_depth(&self, desc: &str, depth: u32) -> Result<usize, LoadError> {
        let max = self.labels.len() - 1;
        if depth as usize > max {
            return Err(self.error(format!("invalid depth: {depth} (max {max}) in {desc}")));
        }
        Ok(self.labels.len() - 1 - depth as usize)
    }

    /// The drop/keep pair a branch to `label_index` must perform from the
    /// current stack height. Saturating, since heights are meaningless in
    /// unreachable code.
    fn branch_drop_keep(&self, label_index: usize) -> (u32, u32) {
        let label = &self.labels[label_index];
        let keep = label.branch_arity();
        let drop = (self.type_stack.len().saturating_sub(label.height) as u32).saturating_sub(keep);
        (drop, keep)
    }

    /// Emit a branch instruction whose pc is patched when the target label
    /// closes; loops branch backwards immediately.
    fn emit_branch(
        &mut self,
        label_index: usize,
        drop: u32,
        keep: u32,
        make: impl FnOnce(BranchTarget) -> Instr,
    ) {
        let label = &self.labels[label_index];
        let pc = if label.kind == LabelKind::Loop {
            label.loop_pc
        } else {
            usize::MAX // patched at end
        };
        let pos = self.code.len();
        self.code.push(make(BranchTarget { pc, drop, keep }));
        if pc == usize::MAX {
            self.labels[label_index].fixups.push(FixupRef::Instr(pos));
        }
    }

    fn patch_fixups(&mut self, fixups: Vec<FixupRef>, pc: usize) {
        for fixup in fixups {
            match fixup {
                FixupRef::Instr(pos) => match &mut self.code[pos] {
                    Instr::Br(t) | Instr::BrIf(t) | Instr::BrUnless(t) => t.pc = pc,
                    instr => unreachable!("fixup on non-branch instruction {instr}"),
                },
                FixupRef::TableTarget { pos, slot } => match &mut self.code[pos] {
                    Instr::BrTable { targets, .. } => targets[slot].pc = pc,
                    instr => unreachable!("fixup on non-branch instruction {instr}"),
                },
                FixupRef::TableDefault { pos } => match &mut self.code[pos] {
                    Instr::BrTable { default, .. } => default.pc = pc,
                    instr => unreachable!("fixup on non-branch instruction {instr}"),
                },
            }
        }
    }

    /// Close the top label: check its result types and stack height, patch
    /// pending branches, and push the results for the surrounding block.
    fn end_label(&mut self) -> Result<(), LoadError> {
        let kind = self.top_label().kind;
        let (pop_desc, end_desc) = match kind {
            LabelKind::Func => ("implicit return", "function"),
            LabelKind::Block => ("block", "block"),
            LabelKind::Loop => ("loop", "loop"),
            LabelKind::If => ("if true branch", "if true branch"),
            LabelKind::Else => ("if false branch", "if false branch"),
        };

        // An `if` without `else` whose false branch must produce a value
        // can never validate; report a broken true branch first, since
        // that is the nearer mistake.
        if kind == LabelKind::If && self.top_label().result.is_some() {
            self.check_label_results(pop_desc, end_desc)?;
            return Err(self.error(
                "type stack size too small at if false branch. got 0, expected at least 1",
            ));
        }

        self.check_label_results(pop_desc, end_desc)?;

        let label = self.labels.pop().expect("label stack is never empty");
        let pc = self.code.len();
        self.patch_fixups(label.fixups, pc);
        if let Some(pos) = label.else_fixup {
            self.patch_fixups(vec![FixupRef::Instr(pos)], pc);
        }
        if let Some(result) = label.result {
            self.push_type(result);
        }
        Ok(())
    }

    /// Check that exactly the label's result types sit above its entry
    /// height, leaving the stack truncated to that height.
    fn check_label_results(&mut self, pop_desc: &str, end_desc: &str) -> Result<(), LoadError> {
        let label = self.top_label();
        let arity = label.result.is_some() as usize;
        let height = label.height;
        let total = self.type_stack.len().saturating_sub(height);

        let expected: Vec<ValueType> = self.top_label().result.into_iter().collect();
        self.pop_expecteds(pop_desc, &expected)?;

        if self.type_stack.len() > height {
            return Err(self.error(format!(
                "type stack at end of {end_desc} is {total}, expected {arity}"
            )));
        }
        self.type_stack.truncate(height);
        Ok(())
    }

    // ---- per-instruction validation and lowering -------------------------

    fn memory_env_index(&self, desc: &str) -> Result<usize, LoadError> {
        self.memory_index
            .ok_or_else(|| self.error(format!("{desc} requires an imported or defined memory")))
    }

    fn check_alignment(&self, desc: &str, mem_arg: &MemArg, width: u32) -> Result<(), LoadError> {
        if mem_arg.align > width.trailing_zeros() {
            return Err(self.error(format!(
                "alignment must not be larger than natural alignment ({width}) in {desc}"
            )));
        }
        Ok(())
    }

    fn load_op(
        &mut self,
        desc: &str,
        mem_arg: MemArg,
        width: u32,
        result: ValueType,
        make: impl FnOnce(u32) -> Instr,
    ) -> Result<(), LoadError> {
        self.memory_env_index(desc)?;
        self.check_alignment(desc, &mem_arg, width)?;
        self.pop_expected(desc, ValueType::I32)?;
        self.push_type(result);
        self.code.push(make(mem_arg.offset));
        Ok(())
    }

    fn store_op(
        &mut self,
        desc: &str,
        mem_arg: MemArg,
        width: u32,
        operand: ValueType,
        make: impl FnOnce(u32) -> Instr,
    ) -> Result<(), LoadError> {
        self.memory_env_index(desc)?;
        self.check_alignment(desc, &mem_arg, width)?;
        self.pop_expecteds(desc, &[ValueType::I32, operand])?;
        self.code.push(make(mem_arg.offset));
        Ok(())
    }

    fn simple_op(
        &mut self,
        desc: &str,
        inputs: &[ValueType],
        output: ValueType,
        instr: Instr,
    ) -> Result<(), LoadError> {
        self.pop_expecteds(desc, inputs)?;
        self.push_type(output);
        self.code.push(instr);
        Ok(())
    }

    fn local_type(&self, desc: &str, index: u32) -> Result<ValueType, LoadError> {
        self.locals.get(index as usize).copied().ok_or_else(|| {
            self.error(format!(
                "invalid local index: {index} (max {}) in {desc}",
                self.locals.len()
            ))
        })
    }

    fn global_env_index(&self, desc: &str, index: u32) -> Result<usize, LoadError> {
        self.global_indices.get(index as usize).copied().ok_or_else(|| {
            self.error(format!(
                "invalid global index: {index} (max {}) in {desc}",
                self.global_indices.len()
            ))
        })
    }
}

impl ModuleVisitor for ModuleBuilder<'_> {
    fn on_signature(
        &mut self,
        params: Vec<ValueType>,
        results: Vec<ValueType>,
        offset: usize,
    ) -> Result<(), LoadError> {
        if results.len() > 1 {
            return Err(LoadError::new(offset, "result count must be 0 or 1"));
        }
        self.sigs.push(FuncSignature::new(params, results));
        Ok(())
    }

    fn on_import_func(
        &mut self,
        module: String,
        field: String,
        sig_index: u32,
        offset: usize,
    ) -> Result<(), LoadError> {
        let sig = self.sigs[sig_index as usize].clone();
        let module_index = self.resolve_import_module(&module, offset)?;

        // Host function imports always go through the delegate: the same
        // field may be imported under several signatures (spectest's
        // `print` is), so there is nothing to share.
        if let Module::Host(host) = self.env.module(module_index) {
            let import = ImportDesc { module, field };
            let callback = host
                .delegate
                .import_func(&import, &sig)
                .map_err(|message| LoadError::new(offset, message))?;
            let func_index = self.env.push_func(Func::Host(HostFunc {
                module_name: import.module,
                field_name: import.field,
                sig,
                callback,
            }));
            self.func_indices.push(func_index);
            return Ok(());
        }

        let export = self
            .find_import_export(module_index, &field, ExternalKind::Func, offset)?
            .expect("defined-module lookups never return None");
        if self.env.func(export.index).sig() != &sig {
            return Err(LoadError::new(offset, "import signature mismatch"));
        }
        self.func_indices.push(export.index);
        Ok(())
    }

    fn on_import_table(
        &mut self,
        module: String,
        field: String,
        limits: Limits,
        offset: usize,
    ) -> Result<(), LoadError> {
        let module_index = self.resolve_import_module(&module, offset)?;

        let table_index = match self.find_import_export(
            module_index,
            &field,
            ExternalKind::Table,
            offset,
        )? {
            Some(export) => export.index,
            None => {
                let import = ImportDesc { module, field };
                let table = match self.env.module(module_index) {
                    Module::Host(host) => host
                        .delegate
                        .import_table(&import, &limits)
                        .map_err(|message| LoadError::new(offset, message))?,
                    Module::Defined(_) => unreachable!("checked by find_import_export"),
                };
                let index = self.env.push_table(table);
                if let Module::Host(host) = self.env.module_mut(module_index) {
                    host.exports.push(Export {
                        name: import.field,
                        kind: ExternalKind::Table,
                        index,
                    });
                }
                index
            }
        };

        Self::check_import_limits(self.env.table(table_index).limits(), &limits, offset)?;
        self.table_index = Some(table_index);
        Ok(())
    }

    fn on_import_memory(
        &mut self,
        module: String,
        field: String,
        limits: Limits,
        offset: usize,
    ) -> Result<(), LoadError> {
        let module_index = self.resolve_import_module(&module, offset)?;

        let memory_index = match self.find_import_export(
            module_index,
            &field,
            ExternalKind::Memory,
            offset,
        )? {
            Some(export) => export.index,
            None => {
                let import = ImportDesc { module, field };
                let memory = match self.env.module(module_index) {
                    Module::Host(host) => host
                        .delegate
                        .import_memory(&import, &limits)
                        .map_err(|message| LoadError::new(offset, message))?,
                    Module::Defined(_) => unreachable!("checked by find_import_export"),
                };
                let index = self.env.push_memory(memory);
                if let Module::Host(host) = self.env.module_mut(module_index) {
                    host.exports.push(Export {
                        name: import.field,
                        kind: ExternalKind::Memory,
                        index,
                    });
                }
                index
            }
        };

        Self::check_import_limits(self.env.memory(memory_index).limits(), &limits, offset)?;
        self.memory_index = Some(memory_index);
        Ok(())
    }

    fn on_import_global(
        &mut self,
        module: String,
        field: String,
        typ: ValueType,
        mutable: bool,
        offset: usize,
    ) -> Result<(), LoadError> {
        if mutable {
            return Err(LoadError::new(offset, "mutable globals cannot be imported"));
        }
        let module_index = self.resolve_import_module(&module, offset)?;

        // Like host functions, host globals are keyed by declared type
        // (spectest's `global` exists for every value type), so the
        // delegate is consulted for each import.
        if let Module::Host(host) = self.env.module(module_index) {
            let import = ImportDesc { module, field };
            let value = host
                .delegate
                .import_global(&import, typ)
                .map_err(|message| LoadError::new(offset, message))?;
            if value.typ() != typ {
                return Err(LoadError::new(
                    offset,
                    format!(
                        "type mismatch in imported global, expected {typ} but got {}",
                        value.typ()
                    ),
                ));
            }
            let index = self.env.push_global(Global {
                value,
                mutable: false,
            });
            self.num_imported_globals += 1;
            self.global_indices.push(index);
            return Ok(());
        }

        let export = self
            .find_import_export(module_index, &field, ExternalKind::Global, offset)?
            .expect("defined-module lookups never return None");
        let global_index = export.index;

        let global = self.env.global(global_index);
        if global.mutable {
            return Err(LoadError::new(offset, "mutable globals cannot be imported"));
        }
        if global.value.typ() != typ {
            return Err(LoadError::new(
                offset,
                format!(
                    "type mismatch in imported global, expected {typ} but got {}",
                    global.value.typ()
                ),
            ));
        }
        self.num_imported_globals += 1;
        self.global_indices.push(global_index);
        Ok(())
    }

    fn on_function(&mut self, sig_index: u32, _offset: usize) -> Result<(), LoadError> {
        // The body arrives with the code section; reserve the entity now
        // so later sections can refer to it by absolute index.
        let index = self.env.push_func(Func::Defined(DefinedFunc {
            sig: self.sigs[sig_index as usize].clone(),
            module_index: self.module_index,
            locals: Vec::new(),
            code: Vec::new().into(),
        }));
        self.func_indices.push(index);
        Ok(())
    }

    fn on_table(&mut self, limits: Limits, _offset: usize) -> Result<(), LoadError> {
        self.table_index = Some(self.env.push_table(Table::new(limits)));
        Ok(())
    }

    fn on_memory(&mut self, limits: Limits, _offset: usize) -> Result<(), LoadError> {
        self.memory_index = Some(self.env.push_memory(Memory::new(limits)));
        Ok(())
    }

    fn on_global(
        &mut self,
        typ: ValueType,
        mutable: bool,
        init: InitExpr,
        offset: usize,
    ) -> Result<(), LoadError> {
        let value = self.eval_init(init, typ, "global initializer expression", offset)?;
        self.global_indices
            .push(self.env.push_global(Global { value, mutable }));
        Ok(())
    }

    fn on_export(
        &mut self,
        name: String,
        kind: ExternalKind,
        index: u32,
        offset: usize,
    ) -> Result<(), LoadError> {
        if self.exports.iter().any(|e| e.name == name) {
            return Err(LoadError::new(offset, format!("duplicate export \"{name}\"")));
        }
        let env_index = match kind {
            ExternalKind::Func => self.func_indices[index as usize],
            ExternalKind::Table => self.table_index.expect("index checked by reader"),
            ExternalKind::Memory => self.memory_index.expect("index checked by reader"),
            ExternalKind::Global => self.global_indices[index as usize],
        };
        self.exports.push(Export {
            name,
            kind,
            index: env_index,
        });
        Ok(())
    }

    fn on_start(&mut self, func_index: u32, offset: usize) -> Result<(), LoadError> {
        let env_index = self.func_indices[func_index as usize];
        let sig = self.env.func(env_index).sig();
        if !sig.params.is_empty() {
            return Err(LoadError::new(offset, "start function must be nullary"));
        }
        if !sig.results.is_empty() {
            return Err(LoadError::new(
                offset,
                "start function must not return anything",
            ));
        }
        self.start_func = Some(env_index);
        Ok(())
    }

    fn on_elem_segment(
        &mut self,
        _table_index: u32,
        init: InitExpr,
        func_indices: Vec<u32>,
        offset: usize,
    ) -> Result<(), LoadError> {
        let table_index = self.table_index.expect("index checked by reader");
        let func_indices = func_indices
            .iter()
            .map(|i| self.func_indices[*i as usize])
            .collect();
        self.elem_segments.push(PendingElemSegment {
            table_index,
            init,
            func_indices,
            offset,
        });
        Ok(())
    }

    fn begin_function_body(
        &mut self,
        index: u32,
        locals: Vec<(u32, ValueType)>,
        _offset: usize,
    ) -> Result<(), LoadError> {
        self.current_func = self.func_indices[index as usize];
        self.current_sig = self.env.func(self.current_func).sig().clone();

        let mut declared = Vec::new();
        for (count, typ) in locals {
            declared.extend(std::iter::repeat(typ).take(count as usize));
        }
        self.locals = self
            .current_sig
            .params
            .iter()
            .copied()
            .chain(declared.iter().copied())
            .collect();
        if let Func::Defined(func) = self.env.func_mut(self.current_func) {
            func.locals = declared;
        }

        self.code = Vec::new();
        self.type_stack.clear();
        self.labels.clear();
        self.push_label(LabelKind::Func, self.current_sig.results.first().copied());
        Ok(())
    }

    fn on_operator(&mut self, op: Operator, offset: usize) -> Result<(), LoadError> {
        self.op_offset = offset;
        let desc = op.mnemonic();
        use ValueType::*;

        match op {
            Operator::Unreachable => {
                self.code.push(Instr::Unreachable);
                self.set_unreachable();
            }
            Operator::Nop => {}

            Operator::Block { result } => self.push_label(LabelKind::Block, result),
            Operator::Loop { result } => self.push_label(LabelKind::Loop, result),
            Operator::If { result } => {
                self.pop_expected(desc, I32)?;
                let pos = self.code.len();
                self.code.push(Instr::BrUnless(BranchTarget {
                    pc: usize::MAX,
                    drop: 0,
                    keep: 0,
                }));
                self.push_label(LabelKind::If, result);
                self.top_label_mut().else_fixup = Some(pos);
            }
            Operator::Else => {
                if self.top_label().kind != LabelKind::If {
                    return Err(self.error("else operator without matching if"));
                }
                self.check_label_results("if true branch", "if true branch")?;

                // Jump over the false branch, then route the `br_unless`
                // of the `if` here.
                let end_jump = self.code.len();
                self.code.push(Instr::Br(BranchTarget {
                    pc: usize::MAX,
                    drop: 0,
                    keep: 0,
                }));
                let else_pc = self.code.len();
                let label = self.top_label_mut();
                label.kind = LabelKind::Else;
                label.unreachable = false;
                label.fixups.push(FixupRef::Instr(end_jump));
                let else_fixup = label.else_fixup.take();
                if let Some(pos) = else_fixup {
                    self.patch_fixups(vec![FixupRef::Instr(pos)], else_pc);
                }
            }
            Operator::End => {
                let is_func_end = self.labels.len() == 1;
                self.end_label()?;
                if is_func_end {
                    self.code.push(Instr::Return);
                }
            }

            Operator::Br { depth } => {
                let label_index = self.label_at_depth(desc, depth)?;
                let (drop, keep) = self.branch_drop_keep(label_index);
                let expected: Vec<ValueType> =
                    self.labels[label_index].branch_type().into_iter().collect();
                self.pop_expecteds(desc, &expected)?;
                self.emit_branch(label_index, drop, keep, Instr::Br);
                self.set_unreachable();
            }
            Operator::BrIf { depth } => {
                self.pop_expected(desc, I32)?;
                let label_index = self.label_at_depth(desc, depth)?;
                let (drop, keep) = self.branch_drop_keep(label_index);
                let expected: Vec<ValueType> =
                    self.labels[label_index].branch_type().into_iter().collect();
                // The branch types stay on the stack on fall-through.
                self.pop_expecteds(desc, &expected)?;
                for ty in &expected {
                    self.push_type(*ty);
                }
                self.emit_branch(label_index, drop, keep, Instr::BrIf);
            }
            Operator::BrTable { targets, default } => {
                self.pop_expected(desc, I32)?;

                let default_index = self.label_at_depth(desc, default)?;
                let expected_type = self.labels[default_index].branch_type();
                let mut label_indices = Vec::with_capacity(targets.len());
                for depth in &targets {
                    let label_index = self.label_at_depth(desc, *depth)?;
                    let target_type = self.labels[label_index].branch_type();
                    if target_type != expected_type {
                        return Err(self.error(format!(
                            "br_table labels have inconsistent types: expected {}, got {}",
                            type_name(expected_type),
                            type_name(target_type)
                        )));
                    }
                    label_indices.push(label_index);
                }

                let expected: Vec<ValueType> = expected_type.into_iter().collect();
                self.pop_expecteds(desc, &expected)?;

                let pos = self.code.len();
                let make_target = |this: &ModuleBuilder<'_>, label_index: usize| {
                    let label = &this.labels[label_index];
                    let keep = label.branch_arity();
                    // The index operand and branch operands are already
                    // popped; compute drops from the pre-pop height.
                    let height = this.type_stack.len() + expected.len();
                    let drop = (height.saturating_sub(label.height) as u32).saturating_sub(keep);
                    let pc = if label.kind == LabelKind::Loop {
                        label.loop_pc
                    } else {
                        usize::MAX
                    };
                    BranchTarget { pc, drop, keep }
                };

                let compiled_targets: Vec<BranchTarget> =
                    label_indices.iter().map(|i| make_target(self, *i)).collect();
                let compiled_default = make_target(self, default_index);
                self.code.push(Instr::BrTable {
                    targets: compiled_targets.into_boxed_slice(),
                    default: compiled_default,
                });

                for (slot, label_index) in label_indices.into_iter().enumerate() {
                    if self.labels[label_index].kind != LabelKind::Loop {
                        self.labels[label_index]
                            .fixups
                            .push(FixupRef::TableTarget { pos, slot });
                    }
                }
                if self.labels[default_index].kind != LabelKind::Loop {
                    self.labels[default_index]
                        .fixups
                        .push(FixupRef::TableDefault { pos });
                }
                self.set_unreachable();
            }
            Operator::Return => {
                let results = self.current_sig.results.clone();
                self.pop_expecteds(desc, &results)?;
                self.code.push(Instr::Return);
                self.set_unreachable();
            }
            Operator::Call { func_index } => {
                let env_index = *self.func_indices.get(func_index as usize).ok_or_else(|| {
                    self.error(format!(
                        "invalid call function index: {func_index} (max {})",
                        self.func_indices.len()
                    ))
                })?;
                let sig = self.env.func(env_index).sig().clone();
                self.pop_expecteds(desc, &sig.params)?;
                for result in &sig.results {
                    self.push_type(*result);
                }
                self.code.push(Instr::Call { func: env_index });
            }
            Operator::CallIndirect { sig_index } => {
                let sig = self
                    .sigs
                    .get(sig_index as usize)
                    .ok_or_else(|| self.error(format!("invalid signature index: {sig_index}")))?
                    .clone();
                let table = self
                    .table_index
                    .ok_or_else(|| self.error("found call_indirect operator, but no table"))?;
                self.pop_expected(desc, I32)?;
                self.pop_expecteds(desc, &sig.params)?;
                for result in &sig.results {
                    self.push_type(*result);
                }
                self.code.push(Instr::CallIndirect { sig, table });
            }

            Operator::Drop => {
                self.check_operand_count(desc, 1)?;
                self.pop_any(desc)?;
                self.code.push(Instr::Drop);
            }
            Operator::Select => {
                self.check_operand_count(desc, 3)?;
                self.pop_expected(desc, I32)?;
                let second = self.pop_any(desc)?;
                let first = self.pop_any(desc)?;
                let result = match (first, second) {
                    (Ty::V(a), Ty::V(b)) if a != b => {
                        return Err(self.error(format!(
                            "type mismatch in {desc}, expected {a} but got {b}"
                        )));
                    }
                    (Ty::V(a), _) => Ty::V(a),
                    (Ty::Any, other) => other,
                };
                self.type_stack.push(result);
                self.code.push(Instr::Select);
            }

            Operator::GetLocal { index } => {
                let typ = self.local_type(desc, index)?;
                self.push_type(typ);
                self.code.push(Instr::GetLocal { index });
            }
            Operator::SetLocal { index } => {
                let typ = self.local_type(desc, index)?;
                self.pop_expected(desc, typ)?;
                self.code.push(Instr::SetLocal { index });
            }
            Operator::TeeLocal { index } => {
                let typ = self.local_type(desc, index)?;
                self.pop_expected(desc, typ)?;
                self.push_type(typ);
                self.code.push(Instr::TeeLocal { index });
            }
            Operator::GetGlobal { index } => {
                let env_index = self.global_env_index(desc, index)?;
                let typ = self.env.global(env_index).value.typ();
                self.push_type(typ);
                self.code.push(Instr::GetGlobal { index: env_index });
            }
            Operator::SetGlobal { index } => {
                let env_index = self.global_env_index(desc, index)?;
                let global = self.env.global(env_index);
                if !global.mutable {
                    return Err(self.error(format!(
                        "can't set_global on immutable global at index {index}"
                    )));
                }
                let typ = global.value.typ();
                self.pop_expected(desc, typ)?;
                self.code.push(Instr::SetGlobal { index: env_index });
            }

            Operator::I32Load(m) => self.load_op(desc, m, 4, I32, |offset| Instr::I32Load { offset })?,
            Operator::I64Load(m) => self.load_op(desc, m, 8, I64, |offset| Instr::I64Load { offset })?,
            Operator::F32Load(m) => self.load_op(desc, m, 4, F32, |offset| Instr::F32Load { offset })?,
            Operator::F64Load(m) => self.load_op(desc, m, 8, F64, |offset| Instr::F64Load { offset })?,
            Operator::I32Load8S(m) => {
                self.load_op(desc, m, 1, I32, |offset| Instr::I32Load8S { offset })?
            }
            Operator::I32Load8U(m) => {
                self.load_op(desc, m, 1, I32, |offset| Instr::I32Load8U { offset })?
            }
            Operator::I32Load16S(m) => {
                self.load_op(desc, m, 2, I32, |offset| Instr::I32Load16S { offset })?
            }
            Operator::I32Load16U(m) => {
                self.load_op(desc, m, 2, I32, |offset| Instr::I32Load16U { offset })?
            }
            Operator::I64Load8S(m) => {
                self.load_op(desc, m, 1, I64, |offset| Instr::I64Load8S { offset })?
            }
            Operator::I64Load8U(m) => {
                self.load_op(desc, m, 1, I64, |offset| Instr::I64Load8U { offset })?
            }
            Operator::I64Load16S(m) => {
                self.load_op(desc, m, 2, I64, |offset| Instr::I64Load16S { offset })?
            }
            Operator::I64Load16U(m) => {
                self.load_op(desc, m, 2, I64, |offset| Instr::I64Load16U { offset })?
            }
            Operator::I64Load32S(m) => {
                self.load_op(desc, m, 4, I64, |offset| Instr::I64Load32S { offset })?
            }
            Operator::I64Load32U(m) => {
                self.load_op(desc, m, 4, I64, |offset| Instr::I64Load32U { offset })?
            }
            Operator::I32Store(m) => {
                self.store_op(desc, m, 4, I32, |offset| Instr::I32Store { offset })?
            }
            Operator::I64Store(m) => {
                self.store_op(desc, m, 8, I64, |offset| Instr::I64Store { offset })?
            }
            Operator::F32Store(m) => {
                self.store_op(desc, m, 4, F32, |offset| Instr::F32Store { offset })?
            }
            Operator::F64Store(m) => {
                self.store_op(desc, m, 8, F64, |offset| Instr::F64Store { offset })?
            }
            Operator::I32Store8(m) => {
                self.store_op(desc, m, 1, I32, |offset| Instr::I32Store8 { offset })?
            }
            Operator::I32Store16(m) => {
                self.store_op(desc, m, 2, I32, |offset| Instr::I32Store16 { offset })?
            }
            Operator::I64Store8(m) => {
                self.store_op(desc, m, 1, I64, |offset| Instr::I64Store8 { offset })?
            }
            Operator::I64Store16(m) => {
                self.store_op(desc, m, 2, I64, |offset| Instr::I64Store16 { offset })?
            }
            Operator::I64Store32(m) => {
                self.store_op(desc, m, 4, I64, |offset| Instr::I64Store32 { offset })?
            }
            Operator::CurrentMemory => {
                self.memory_env_index(desc)?;
                self.push_type(I32);
                self.code.push(Instr::CurrentMemory);
            }
            Operator::GrowMemory => {
                self.memory_env_index(desc)?;
                self.pop_expected(desc, I32)?;
                self.push_type(I32);
                self.code.push(Instr::GrowMemory);
            }

            Operator::I32Const { value } => {
                self.push_type(I32);
                self.code.push(Instr::I32Const(value));
            }
            Operator::I64Const { value } => {
                self.push_type(I64);
                self.code.push(Instr::I64Const(value));
            }
            Operator::F32Const { bits } => {
                self.push_type(F32);
                self.code.push(Instr::F32Const(bits));
            }
            Operator::F64Const { bits } => {
                self.push_type(F64);
                self.code.push(Instr::F64Const(bits));
            }

            op => {
                let (inputs, output, instr) = simple_op_signature(&op);
                self.simple_op(desc, inputs, output, instr)?;
            }
        }
        Ok(())
    }

    fn end_function_body(&mut self, _offset: usize) -> Result<(), LoadError> {
        let code: Rc<[Instr]> = std::mem::take(&mut self.code).into();
        if let Func::Defined(func) = self.env.func_mut(self.current_func) {
            func.code = code;
        }
        Ok(())
    }

    fn on_data_segment(
        &mut self,
        _memory_index: u32,
        init: InitExpr,
        data: Vec<u8>,
        offset: usize,
    ) -> Result<(), LoadError> {
        self.data_segments.push(PendingDataSegment {
            memory_index: self.memory_index.expect("index checked by reader"),
            init,
            data,
            offset,
        });
        Ok(())
    }

    fn end_module(&mut self, _offset: usize) -> Result<(), LoadError> {
        // Bounds-check every segment before mutating anything, so a failed
        // load cannot leave a partial write in an imported table or memory.
        let mut elem_offsets = Vec::with_capacity(self.elem_segments.len());
        for segment in &self.elem_segments {
            let value = self.eval_init(
                segment.init,
                ValueType::I32,
                "elem segment offset",
                segment.offset,
            )?;
            let start = value.as_i32().expect("type checked above") as u32;
            let size = self.env.table(segment.table_index).size();
            let end = start as u64 + segment.func_indices.len() as u64;
            if end > size as u64 {
                return Err(LoadError::new(
                    segment.offset,
                    format!("elem segment offset is out of bounds: {start} >= max value {size}"),
                ));
            }
            elem_offsets.push(start);
        }

        let mut data_offsets = Vec::with_capacity(self.data_segments.len());
        for segment in &self.data_segments {
            let value = self.eval_init(
                segment.init,
                ValueType::I32,
                "data segment offset",
                segment.offset,
            )?;
            let start = value.as_i32().expect("type checked above") as u32;
            let size = self.env.memory(segment.memory_index).byte_len() as u64;
            let end = start as u64 + segment.data.len() as u64;
            if end > size {
                return Err(LoadError::new(
                    segment.offset,
                    format!(
                        "data segment is out of bounds: [{start}, {end}) >= max value {size}"
                    ),
                ));
            }
            data_offsets.push(start);
        }

        for (segment, start) in self.elem_segments.iter().zip(elem_offsets) {
            let table = self.env.table_mut(segment.table_index);
            for (i, func_index) in segment.func_indices.iter().enumerate() {
                table
                    .set(start + i as u32, *func_index)
                    .expect("bounds checked above");
            }
        }
        for (segment, start) in self.data_segments.iter().zip(data_offsets) {
            self.env
                .memory_mut(segment.memory_index)
                .write_bytes(start, &segment.data)
                .expect("bounds checked above");
        }

        let index = self.env.push_module(Module::Defined(DefinedModule {
            name: self.name.clone(),
            exports: std::mem::take(&mut self.exports),
            func_indices: std::mem::take(&mut self.func_indices),
            table_index: self.table_index,
            memory_index: self.memory_index,
            global_indices: std::mem::take(&mut self.global_indices),
            start_func: self.start_func,
        }));
        debug_assert_eq!(index, self.module_index);
        Ok(())
    }
}

fn type_name(typ: Option<ValueType>) -> &'static str {
    match typ {
        Some(t) => t.name(),
        None => "void",
    }
}

/// Operand and result types plus the compiled form of every instruction
/// with no immediates. One table serves both validation and lowering.
fn simple_op_signature(op: &Operator) -> (&'static [ValueType], ValueType, Instr) {
    use ValueType::{F32, F64, I32, I64};
    const I32_1: &[ValueType] = &[I32];
    const I32_2: &[ValueType] = &[I32, I32];
    const I64_1: &[ValueType] = &[I64];
    const I64_2: &[ValueType] = &[I64, I64];
    const F32_1: &[ValueType] = &[F32];
    const F32_2: &[ValueType] = &[F32, F32];
    const F64_1: &[ValueType] = &[F64];
    const F64_2: &[ValueType] = &[F64, F64];

    match op {
        Operator::I32Eqz => (I32_1, I32, Instr::I32Eqz),
        Operator::I32Eq => (I32_2, I32, Instr::I32Eq),
        Operator::I32Ne => (I32_2, I32, Instr::I32Ne),
        Operator::I32LtS => (I32_2, I32, Instr::I32LtS),
        Operator::I32LtU => (I32_2, I32, Instr::I32LtU),
        Operator::I32GtS => (I32_2, I32, Instr::I32GtS),
        Operator::I32GtU => (I32_2, I32, Instr::I32GtU),
        Operator::I32LeS => (I32_2, I32, Instr::I32LeS),
        Operator::I32LeU => (I32_2, I32, Instr::I32LeU),
        Operator::I32GeS => (I32_2, I32, Instr::I32GeS),
        Operator::I32GeU => (I32_2, I32, Instr::I32GeU),
        Operator::I64Eqz => (I64_1, I32, Instr::I64Eqz),
        Operator::I64Eq => (I64_2, I32, Instr::I64Eq),
        Operator::I64Ne => (I64_2, I32, Instr::I64Ne),
        Operator::I64LtS => (I64_2, I32, Instr::I64LtS),
        Operator::I64LtU => (I64_2, I32, Instr::I64LtU),
        Operator::I64GtS => (I64_2, I32, Instr::I64GtS),
        Operator::I64GtU => (I64_2, I32, Instr::I64GtU),
        Operator::I64LeS => (I64_2, I32, Instr::I64LeS),
        Operator::I64LeU => (I64_2, I32, Instr::I64LeU),
        Operator::I64GeS => (I64_2, I32, Instr::I64GeS),
        Operator::I64GeU => (I64_2, I32, Instr::I64GeU),
        Operator::F32Eq => (F32_2, I32, Instr::F32Eq),
        Operator::F32Ne => (F32_2, I32, Instr::F32Ne),
        Operator::F32Lt => (F32_2, I32, Instr::F32Lt),
        Operator::F32Gt => (F32_2, I32, Instr::F32Gt),
        Operator::F32Le => (F32_2, I32, Instr::F32Le),
        Operator::F32Ge => (F32_2, I32, Instr::F32Ge),
        Operator::F64Eq => (F64_2, I32, Instr::F64Eq),
        Operator::F64Ne => (F64_2, I32, Instr::F64Ne),
        Operator::F64Lt => (F64_2, I32, Instr::F64Lt),
        Operator::F64Gt => (F64_2, I32, Instr::F64Gt),
        Operator::F64Le => (F64_2, I32, Instr::F64Le),
        Operator::F64Ge => (F64_2, I32, Instr::F64Ge),

        Operator::I32Clz => (I32_1, I32, Instr::I32Clz),
        Operator::I32Ctz => (I32_1, I32, Instr::I32Ctz),
        Operator::I32Popcnt => (I32_1, I32, Instr::I32Popcnt),
        Operator::I32Add => (I32_2, I32, Instr::I32Add),
        Operator::I32Sub => (I32_2, I32, Instr::I32Sub),
        Operator::I32Mul => (I32_2, I32, Instr::I32Mul),
        Operator::I32DivS => (I32_2, I32, Instr::I32DivS),
        Operator::I32DivU => (I32_2, I32, Instr::I32DivU),
        Operator::I32RemS => (I32_2, I32, Instr::I32RemS),
        Operator::I32RemU => (I32_2, I32, Instr::I32RemU),
        Operator::I32And => (I32_2, I32, Instr::I32And),
        Operator::I32Or => (I32_2, I32, Instr::I32Or),
        Operator::I32Xor => (I32_2, I32, Instr::I32Xor),
        Operator::I32Shl => (I32_2, I32, Instr::I32Shl),
        Operator::I32ShrS => (I32_2, I32, Instr::I32ShrS),
        Operator::I32ShrU => (I32_2, I32, Instr::I32ShrU),
        Operator::I32Rotl => (I32_2, I32, Instr::I32Rotl),
        Operator::I32Rotr => (I32_2, I32, Instr::I32Rotr),
        Operator::I64Clz => (I64_1, I64, Instr::I64Clz),
        Operator::I64Ctz => (I64_1, I64, Instr::I64Ctz),
        Operator::I64Popcnt => (I64_1, I64, Instr::I64Popcnt),
        Operator::I64Add => (I64_2, I64, Instr::I64Add),
        Operator::I64Sub => (I64_2, I64, Instr::I64Sub),
        Operator::I64Mul => (I64_2, I64, Instr::I64Mul),
        Operator::I64DivS => (I64_2, I64, Instr::I64DivS),
        Operator::I64DivU => (I64_2, I64, Instr::I64DivU),
        Operator::I64RemS => (I64_2, I64, Instr::I64RemS),
        Operator::I64RemU => (I64_2, I64, Instr::I64RemU),
        Operator::I64And => (I64_2, I64, Instr::I64And),
        Operator::I64Or => (I64_2, I64, Instr::I64Or),
        Operator::I64Xor => (I64_2, I64, Instr::I64Xor),
        Operator::I64Shl => (I64_2, I64, Instr::I64Shl),
        Operator::I64ShrS => (I64_2, I64, Instr::I64ShrS),
        Operator::I64ShrU => (I64_2, I64, Instr::I64ShrU),
        Operator::I64Rotl => (I64_2, I64, Instr::I64Rotl),
        Operator::I64Rotr => (I64_2, I64, Instr::I64Rotr),

        Operator::F32Abs => (F32_1, F32, Instr::F32Abs),
        Operator::F32Neg => (F32_1, F32, Instr::F32Neg),
        Operator::F32Ceil => (F32_1, F32, Instr::F32Ceil),
        Operator::F32Floor => (F32_1, F32, Instr::F32Floor),
        Operator::F32Trunc => (F32_1, F32, Instr::F32Trunc),
        Operator::F32Nearest => (F32_1, F32, Instr::F32Nearest),
        Operator::F32Sqrt => (F32_1, F32, Instr::F32Sqrt),
        Operator::F32Add => (F32_2, F32, Instr::F32Add),
        Operator::F32Sub => (F32_2, F32, Instr::F32Sub),
        Operator::F32Mul => (F32_2, F32, Instr::F32Mul),
        Operator::F32Div => (F32_2, F32, Instr::F32Div),
        Operator::F32Min => (F32_2, F32, Instr::F32Min),
        Operator::F32Max => (F32_2, F32, Instr::F32Max),
        Operator::F32Copysign => (F32_2, F32, Instr::F32Copysign),
        Operator::F64Abs => (F64_1, F64, Instr::F64Abs),
        Operator::F64Neg => (F64_1, F64, Instr::F64Neg),
        Operator::F64Ceil => (F64_1, F64, Instr::F64Ceil),
        Operator::F64Floor => (F64_1, F64, Instr::F64Floor),
        Operator::F64Trunc => (F64_1, F64, Instr::F64Trunc),
        Operator::F64Nearest => (F64_1, F64, Instr::F64Nearest),
        Operator::F64Sqrt => (F64_1, F64, Instr::F64Sqrt),
        Operator::F64Add => (F64_2, F64, Instr::F64Add),
        Operator::F64Sub => (F64_2, F64, Instr::F64Sub),
        Operator::F64Mul => (F64_2, F64, Instr::F64Mul),
        Operator::F64Div => (F64_2, F64, Instr::F64Div),
        Operator::F64Min => (F64_2, F64, Instr::F64Min),
        Operator::F64Max => (F64_2, F64, Instr::F64Max),
        Operator::F64Copysign => (F64_2, F64, Instr::F64Copysign),

        Operator::I32WrapI64 => (I64_1, I32, Instr::I32WrapI64),
        Operator::I32TruncF32S => (F32_1, I32, Instr::I32TruncF32S),
        Operator::I32TruncF32U => (F32_1, I32, Instr::I32TruncF32U),
        Operator::I32TruncF64S => (F64_1, I32, Instr::I32TruncF64S),
        Operator::I32TruncF64U => (F64_1, I32, Instr::I32TruncF64U),
        Operator::I64ExtendI32S => (I32_1, I64, Instr::I64ExtendI32S),
        Operator::I64ExtendI32U => (I32_1, I64, Instr::I64ExtendI32U),
        Operator::I64TruncF32S => (F32_1, I64, Instr::I64TruncF32S),
        Operator::I64TruncF32U => (F32_1, I64, Instr::I64TruncF32U),
        Operator::I64TruncF64S => (F64_1, I64, Instr::I64TruncF64S),
        Operator::I64TruncF64U => (F64_1, I64, Instr::I64TruncF64U),
        Operator::F32ConvertI32S => (I32_1, F32, Instr::F32ConvertI32S),
        Operator::F32ConvertI32U => (I32_1, F32, Instr::F32ConvertI32U),
        Operator::F32ConvertI64S => (I64_1, F32, Instr::F32ConvertI64S),
        Operator::F32ConvertI64U => (I64_1, F32, Instr::F32ConvertI64U),
        Operator::F32DemoteF64 => (F64_1, F32, Instr::F32DemoteF64),
        Operator::F64ConvertI32S => (I32_1, F64, Instr::F64ConvertI32S),
        Operator::F64ConvertI32U => (I32_1, F64, Instr::F64ConvertI32U),
        Operator::F64ConvertI64S => (I64_1, F64, Instr::F64ConvertI64S),
        Operator::F64ConvertI64U => (I64_1, F64, Instr::F64ConvertI64U),
        Operator::F64PromoteF32 => (F32_1, F64, Instr::F64PromoteF32),
        Operator::I32ReinterpretF32 => (F32_1, I32, Instr::I32ReinterpretF32),
        Operator::I64ReinterpretF64 => (F64_1, I64, Instr::I64ReinterpretF64),
        Operator::F32ReinterpretI32 => (I32_1, F32, Instr::F32ReinterpretI32),
        Operator::F64ReinterpretI64 => (I64_1, F64, Instr::F64ReinterpretI64),

        op => unreachable!("{} has immediates and is handled directly", op.mnemonic()),
    }
}
