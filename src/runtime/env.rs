//! The environment: owner of every module, function, table, memory, and
//! global, plus the name bindings used for linking.
//!
//! All entity vectors are append-only. A loader takes a [`MarkPoint`]
//! before reading a module and rolls back to it if anything fails, so a
//! half-instantiated module never becomes observable. Modules refer to
//! their entities by absolute indices into these vectors, never by
//! pointer, which keeps rollback a simple truncation.

use std::collections::HashMap;
use std::rc::Rc;

use crate::types::{ExternalKind, FuncSignature, ValueType};

use super::code::Instr;
use super::host::HostImportDelegate;
use super::memory::Memory;
use super::table::Table;
use super::value::Value;

/// A host function implementation: receives its signature and arguments,
/// returns result values or a printable message that surfaces as a
/// `HostTrapped` trap.
pub type HostCallback = Box<dyn Fn(&FuncSignature, &[Value]) -> Result<Vec<Value>, String>>;

/// A typed global variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Global {
    pub value: Value,
    pub mutable: bool,
}

/// A function defined by a loaded module: its compiled body plus the
/// declared (non-parameter) locals.
pub struct DefinedFunc {
    pub sig: FuncSignature,
    pub module_index: usize,
    pub locals: Vec<ValueType>,
    pub code: Rc<[Instr]>,
}

/// A function provided by a host module.
pub struct HostFunc {
    pub module_name: String,
    pub field_name: String,
    pub sig: FuncSignature,
    pub callback: HostCallback,
}

/// A function entity; dispatch on the tag is always explicit.
pub enum Func {
    Defined(DefinedFunc),
    Host(HostFunc),
}

impl Func {
    pub fn sig(&self) -> &FuncSignature {
        match self {
            Func::Defined(f) => &f.sig,
            Func::Host(f) => &f.sig,
        }
    }
}

/// A named, typed export. `index` is an absolute environment index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: usize,
}

/// A module loaded from binary. Element and data segments have already
/// been applied by the time the module is observable.
pub struct DefinedModule {
    pub name: Option<String>,
    pub exports: Vec<Export>,
    /// Module function space (imports first), as environment indices.
    pub func_indices: Vec<usize>,
    pub table_index: Option<usize>,
    pub memory_index: Option<usize>,
    pub global_indices: Vec<usize>,
    /// Absolute environment index of the start function, if declared.
    pub start_func: Option<usize>,
}

/// A host-provided module: exports only, created on demand by a delegate
/// as imports against it resolve.
pub struct HostModule {
    pub name: String,
    pub exports: Vec<Export>,
    pub delegate: Box<dyn HostImportDelegate>,
}

pub enum Module {
    Defined(DefinedModule),
    Host(HostModule),
}

impl Module {
    pub fn name(&self) -> Option<&str> {
        match self {
            Module::Defined(m) => m.name.as_deref(),
            Module::Host(m) => Some(&m.name),
        }
    }

    pub fn exports(&self) -> &[Export] {
        match self {
            Module::Defined(m) => &m.exports,
            Module::Host(m) => &m.exports,
        }
    }

    /// Find an export by name.
    pub fn find_export(&self, name: &str) -> Option<&Export> {
        self.exports().iter().find(|e| e.name == name)
    }
}

/// A snapshot of the environment's size, for rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkPoint {
    funcs: usize,
    tables: usize,
    memories: usize,
    globals: usize,
    modules: usize,
}

/// The process-wide registry for one interpreter instance.
#[derive(Default)]
pub struct Environment {
    funcs: Vec<Func>,
    tables: Vec<Table>,
    memories: Vec<Memory>,
    globals: Vec<Global>,
    modules: Vec<Module>,
    /// Script-level names (e.g. `$m`) for loaded modules.
    module_bindings: HashMap<String, usize>,
    /// Names importable by other modules (`register`, host modules).
    registered_bindings: HashMap<String, usize>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment::default()
    }

    /// Snapshot the current size of every entity vector.
    pub fn mark(&self) -> MarkPoint {
        MarkPoint {
            funcs: self.funcs.len(),
            tables: self.tables.len(),
            memories: self.memories.len(),
            globals: self.globals.len(),
            modules: self.modules.len(),
        }
    }

    /// Undo everything appended since `mark` was taken, including name
    /// bindings that refer to since-removed modules.
    pub fn reset_to_mark(&mut self, mark: MarkPoint) {
        self.funcs.truncate(mark.funcs);
        self.tables.truncate(mark.tables);
        self.memories.truncate(mark.memories);
        self.globals.truncate(mark.globals);
        self.modules.truncate(mark.modules);
        self.module_bindings.retain(|_, index| *index < mark.modules);
        self.registered_bindings.retain(|_, index| *index < mark.modules);
    }

    /// Append a host module and register it for import resolution.
    pub fn append_host_module(
        &mut self,
        name: impl Into<String>,
        delegate: Box<dyn HostImportDelegate>,
    ) -> usize {
        let name = name.into();
        let index = self.modules.len();
        self.modules.push(Module::Host(HostModule {
            name: name.clone(),
            exports: Vec::new(),
            delegate,
        }));
        self.registered_bindings.insert(name, index);
        index
    }

    /// Make a loaded module importable under `alias`.
    pub fn register_module(&mut self, alias: impl Into<String>, module_index: usize) {
        self.registered_bindings.insert(alias.into(), module_index);
    }

    /// Bind a script-level name (e.g. `$m`) to a loaded module.
    pub fn bind_module(&mut self, name: impl Into<String>, module_index: usize) {
        self.module_bindings.insert(name.into(), module_index);
    }

    /// Look up a module by its script-level name.
    pub fn find_module(&self, name: &str) -> Option<usize> {
        self.module_bindings.get(name).copied()
    }

    /// Look up a module by its registered (importable) name.
    pub fn find_registered_module(&self, name: &str) -> Option<usize> {
        self.registered_bindings.get(name).copied()
    }

    /// The most recently loaded module.
    pub fn last_module(&self) -> Option<usize> {
        if self.modules.is_empty() {
            None
        } else {
            Some(self.modules.len() - 1)
        }
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    // Entity accessors. Absolute indices stored in modules and compiled
    // code are valid for the lifetime of the environment, so plain
    // indexing is used; an out-of-range index is a builder bug.

    pub fn func(&self, index: usize) -> &Func {
        &self.funcs[index]
    }

    pub fn func_mut(&mut self, index: usize) -> &mut Func {
        &mut self.funcs[index]
    }

    pub fn table(&self, index: usize) -> &Table {
        &self.tables[index]
    }

    pub fn table_mut(&mut self, index: usize) -> &mut Table {
        &mut self.tables[index]
    }

    pub fn memory(&self, index: usize) -> &Memory {
        &self.memories[index]
    }

    pub fn memory_mut(&mut self, index: usize) -> &mut Memory {
        &mut self.memories[index]
    }

    pub fn global(&self, index: usize) -> &Global {
        &self.globals[index]
    }

    pub fn global_mut(&mut self, index: usize) -> &mut Global {
        &mut self.globals[index]
    }

    pub fn module(&self, index: usize) -> &Module {
        &self.modules[index]
    }

    pub fn module_mut(&mut self, index: usize) -> &mut Module {
        &mut self.modules[index]
    }

    pub fn push_func(&mut self, func: Func) -> usize {
        self.funcs.push(func);
        self.funcs.len() - 1
    }

    pub fn push_table(&mut self, table: Table) -> usize {
        self.tables.push(table);
        self.tables.len() - 1
    }

    pub fn push_memory(&mut self, memory: Memory) -> usize {
        self.memories.push(memory);
        self.memories.len() - 1
    }

    pub fn push_global(&mut self, global: Global) -> usize {
        self.globals.push(global);
        self.globals.len() - 1
    }

    pub fn push_module(&mut self, module: Module) -> usize {
        self.modules.push(module);
        self.modules.len() - 1
    }
}
