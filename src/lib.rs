//! A stack-based WebAssembly interpreter.
//!
//! winterp loads binary WebAssembly (MVP) modules, validates them against
//! the type system, links them against host-provided and previously loaded
//! modules, and executes their functions with full trap semantics.
//!
//! # Modules
//!
//! - [`parser`] -- Binary format decoder. Streams `.wasm` bytes through the
//!   [`parser::ModuleVisitor`] event interface.
//! - [`runtime`] -- The [`runtime::Environment`] (modules, functions,
//!   tables, memories, globals, name bindings), the validating module
//!   builder, and the [`runtime::Thread`] dispatch loop.
//! - [`spec`] -- Driver for the JSON test scripts produced by the
//!   WebAssembly specification tooling.
//!
//! # Example
//!
//! Load a binary module and call an exported function:
//!
//! ```no_run
//! use winterp::runtime::{read_binary, Environment, Thread, ThreadOptions, Value};
//!
//! let bytes = std::fs::read("add.wasm").unwrap();
//! let mut env = Environment::new();
//! let module = read_binary(&mut env, Some("add"), &bytes).unwrap();
//!
//! let mut thread = Thread::new(ThreadOptions::default());
//! let results = thread
//!     .run_export(&mut env, module, "add", &[Value::I32(2), Value::I32(3)])
//!     .unwrap();
//! assert_eq!(results, vec![Value::I32(5)]);
//! ```

pub mod parser;
pub mod runtime;
pub mod spec;
pub mod types;
