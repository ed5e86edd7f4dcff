//! Host-import glue.
//!
//! A host module owns a [`HostImportDelegate`] that is consulted once per
//! imported field; the entity it produces is cached on the host module's
//! export list, so two modules importing the same field share one entity.
//! The [`SpectestImportDelegate`] is the reference delegate used by the
//! specification test suite.

use std::fmt;

use crate::types::{FuncSignature, Limits, ValueType};

use super::env::HostCallback;
use super::memory::Memory;
use super::table::Table;
use super::value::Value;

/// The (module name, field name) pair of an import being resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDesc {
    pub module: String,
    pub field: String,
}

impl fmt::Display for ImportDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}.{}\"", self.module, self.field)
    }
}

/// Resolver for imports against a host module.
///
/// Each method receives the import descriptor and either produces the
/// entity (installing a callback or initial state) or fails with a
/// printable message, which the loader reports verbatim.
pub trait HostImportDelegate {
    fn import_func(
        &self,
        import: &ImportDesc,
        sig: &FuncSignature,
    ) -> Result<HostCallback, String>;

    fn import_table(&self, import: &ImportDesc, declared: &Limits) -> Result<Table, String>;

    fn import_memory(&self, import: &ImportDesc, declared: &Limits) -> Result<Memory, String>;

    fn import_global(&self, import: &ImportDesc, typ: ValueType) -> Result<Value, String>;
}

/// The `spectest` host module used by the specification tests: a `print`
/// function that echoes its arguments, a table with limits (10, 20), a
/// one-page memory (max 2), and constant globals keyed by declared type.
pub struct SpectestImportDelegate;

impl HostImportDelegate for SpectestImportDelegate {
    fn import_func(
        &self,
        import: &ImportDesc,
        _sig: &FuncSignature,
    ) -> Result<HostCallback, String> {
        if import.field != "print" {
            return Err(format!("unknown host function import {import}"));
        }
        let name = format!("{}.{}", import.module, import.field);
        Ok(Box::new(move |sig: &FuncSignature, args: &[Value]| {
            let rendered: Vec<String> = args.iter().map(|v| v.to_string()).collect();
            println!("called host {name}({}) =>", rendered.join(", "));
            // Results (the spec suite never declares any) are zero-filled.
            Ok(sig.results.iter().map(|t| Value::zero(*t)).collect())
        }))
    }

    fn import_table(&self, import: &ImportDesc, _declared: &Limits) -> Result<Table, String> {
        if import.field != "table" {
            return Err(format!("unknown host table import {import}"));
        }
        Ok(Table::new(Limits::new(10, Some(20))))
    }

    fn import_memory(&self, import: &ImportDesc, _declared: &Limits) -> Result<Memory, String> {
        if import.field != "memory" {
            return Err(format!("unknown host memory import {import}"));
        }
        Ok(Memory::new(Limits::new(1, Some(2))))
    }

    fn import_global(&self, import: &ImportDesc, typ: ValueType) -> Result<Value, String> {
        if import.field != "global" {
            return Err(format!("unknown host global import {import}"));
        }
        Ok(match typ {
            ValueType::I32 => Value::I32(666),
            ValueType::I64 => Value::I64(666),
            ValueType::F32 => Value::F32(666.6),
            ValueType::F64 => Value::F64(666.6),
        })
    }
}

/// Register the `spectest` host module; call before loading any module
/// that imports from it.
pub fn init_spectest(env: &mut super::Environment) -> usize {
    env.append_host_module("spectest", Box::new(SpectestImportDelegate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(field: &str) -> ImportDesc {
        ImportDesc {
            module: "spectest".to_string(),
            field: field.to_string(),
        }
    }

    #[test]
    fn test_spectest_print() {
        let delegate = SpectestImportDelegate;
        let sig = FuncSignature::new(vec![ValueType::I32], vec![]);
        let callback = delegate.import_func(&import("print"), &sig).unwrap();
        let results = callback(&sig, &[Value::I32(1)]).unwrap();
        assert!(results.is_empty());

        let err = match delegate.import_func(&import("println"), &sig) {
            Err(e) => e,
            Ok(_) => panic!("expected import_func to fail"),
        };
        assert_eq!(err, "unknown host function import \"spectest.println\"");
    }

    #[test]
    fn test_spectest_table_and_memory() {
        let delegate = SpectestImportDelegate;
        let declared = Limits::new(0, None);

        let table = delegate.import_table(&import("table"), &declared).unwrap();
        assert_eq!(table.size(), 10);
        assert_eq!(table.limits().max, Some(20));

        let memory = delegate.import_memory(&import("memory"), &declared).unwrap();
        assert_eq!(memory.pages(), 1);
        assert_eq!(memory.limits().max, Some(2));

        assert!(delegate.import_table(&import("tab"), &declared).is_err());
        assert!(delegate.import_memory(&import("mem"), &declared).is_err());
    }

    #[test]
    fn test_spectest_globals() {
        let delegate = SpectestImportDelegate;
        assert_eq!(
            delegate.import_global(&import("global"), ValueType::I32).unwrap(),
            Value::I32(666)
        );
        assert_eq!(
            delegate.import_global(&import("global"), ValueType::F64).unwrap(),
            Value::F64(666.6)
        );
        assert!(delegate.import_global(&import("g"), ValueType::I32).is_err());
    }
}
