//! The interpreter: a typed value stack, a call stack, and a single
//! dispatch loop over compiled instruction streams.
//!
//! Locals live on the value stack: a call sets the frame base to the top
//! of stack minus the callee's parameter count and pushes zeroes for the
//! declared locals, so `get_local`/`set_local` are base-relative loads and
//! stores. Both stacks have fixed capacities chosen at construction;
//! overflow is detected before the offending push and reported as a trap,
//! never as a host stack overflow.
//!
//! Every instruction handler either falls through to the next program
//! counter, jumps, enters or leaves a frame, or returns a trap; traps
//! unwind straight out of [`Thread::run_function`], which leaves both
//! stacks empty no matter how deeply execution nested.

use std::io::Write;
use std::rc::Rc;

use crate::types::FuncSignature;

use super::code::{BranchTarget, Instr};
use super::env::{Environment, Func, Module};
use super::numeric;
use super::value::Value;
use super::Trap;

/// Sizing for a thread's two stacks.
#[derive(Debug, Clone, Copy)]
pub struct ThreadOptions {
    /// Capacity of the value stack, in values.
    pub value_stack_size: usize,
    /// Capacity of the call stack, in frames.
    pub call_stack_size: usize,
}

impl Default for ThreadOptions {
    fn default() -> ThreadOptions {
        ThreadOptions {
            value_stack_size: 16 * 1024,
            call_stack_size: 1024,
        }
    }
}

/// A suspended caller: everything needed to resume it on return.
struct Frame {
    code: Rc<[Instr]>,
    pc: usize,
    base: usize,
    module_index: usize,
    arity: usize,
}

/// A private execution context. One thread runs one invocation at a time;
/// the environment it executes against is passed into each call.
pub struct Thread {
    options: ThreadOptions,
    values: Vec<Value>,
    frames: Vec<Frame>,
}

impl Thread {
    pub fn new(options: ThreadOptions) -> Thread {
        Thread {
            options,
            values: Vec::with_capacity(options.value_stack_size.min(4096)),
            frames: Vec::with_capacity(options.call_stack_size.min(256)),
        }
    }

    /// Invoke a function by its environment index.
    pub fn run_function(
        &mut self,
        env: &mut Environment,
        func_index: usize,
        args: &[Value],
    ) -> Result<Vec<Value>, Trap> {
        self.invoke(env, func_index, args, None)
    }

    /// Like [`Thread::run_function`], but writes one line per executed
    /// instruction to `out`.
    pub fn trace_function(
        &mut self,
        env: &mut Environment,
        func_index: usize,
        out: &mut dyn Write,
        args: &[Value],
    ) -> Result<Vec<Value>, Trap> {
        self.invoke(env, func_index, args, Some(out))
    }

    /// Invoke an exported function of a module by name.
    pub fn run_export(
        &mut self,
        env: &mut Environment,
        module_index: usize,
        name: &str,
        args: &[Value],
    ) -> Result<Vec<Value>, Trap> {
        let func_index = export_index(env, module_index, name, crate::types::ExternalKind::Func)?;
        self.run_function(env, func_index, args)
    }

    /// Run a module's start function, if it declares one. A trap here
    /// makes the module uninstantiable; the caller is responsible for
    /// resetting the environment to its pre-load mark.
    pub fn run_start(&mut self, env: &mut Environment, module_index: usize) -> Result<(), Trap> {
        let start = match env.module(module_index) {
            Module::Defined(module) => module.start_func,
            Module::Host(_) => None,
        };
        if let Some(func_index) = start {
            self.run_function(env, func_index, &[])?;
        }
        Ok(())
    }

    fn invoke(
        &mut self,
        env: &mut Environment,
        func_index: usize,
        args: &[Value],
        trace: Option<&mut dyn Write>,
    ) -> Result<Vec<Value>, Trap> {
        self.values.clear();
        self.frames.clear();

        let sig = env.func(func_index).sig();
        check_args(sig, args)?;
        let arity = sig.results.len();

        for arg in args {
            self.push_value(*arg)?;
        }

        let result = match env.func(func_index) {
            Func::Host(_) => self.call_host(env, func_index),
            Func::Defined(_) => self.exec(env, func_index, trace),
        };

        let outcome = result.map(|()| self.values.split_off(self.values.len() - arity));
        self.values.clear();
        self.frames.clear();
        outcome
    }

    // ---- stack primitives ------------------------------------------------

    fn push_value(&mut self, value: Value) -> Result<(), Trap> {
        if self.values.len() >= self.options.value_stack_size {
            return Err(Trap::ValueStackExhausted);
        }
        self.values.push(value);
        Ok(())
    }

    fn pop_value(&mut self) -> Value {
        self.values.pop().expect("validated code cannot underflow")
    }

    fn pop_i32(&mut self) -> i32 {
        match self.pop_value() {
            Value::I32(v) => v,
            _ => unreachable!("validated code always pops an i32 here"),
        }
    }

    fn pop_i64(&mut self) -> i64 {
        match self.pop_value() {
            Value::I64(v) => v,
            _ => unreachable!("validated code always pops an i64 here"),
        }
    }

    fn pop_f32(&mut self) -> f32 {
        match self.pop_value() {
            Value::F32(v) => v,
            _ => unreachable!("validated code always pops an f32 here"),
        }
    }

    fn pop_f64(&mut self) -> f64 {
        match self.pop_value() {
            Value::F64(v) => v,
            _ => unreachable!("validated code always pops an f64 here"),
        }
    }

    fn push_i32(&mut self, value: i32) -> Result<(), Trap> {
        self.push_value(Value::I32(value))
    }

    fn push_i64(&mut self, value: i64) -> Result<(), Trap> {
        self.push_value(Value::I64(value))
    }

    fn push_f32(&mut self, value: f32) -> Result<(), Trap> {
        self.push_value(Value::F32(value))
    }

    fn push_f64(&mut self, value: f64) -> Result<(), Trap> {
        self.push_value(Value::F64(value))
    }

    fn push_bool(&mut self, value: bool) -> Result<(), Trap> {
        self.push_i32(value as i32)
    }

    /// Unwind a branch: keep the top `keep` values, remove the `drop`
    /// values below them.
    fn branch(&mut self, target: &BranchTarget) {
        let keep_start = self.values.len() - target.keep as usize;
        let new_top = keep_start - target.drop as usize;
        self.values.drain(new_top..keep_start);
    }

    // ---- host calls ------------------------------------------------------

    /// Call a host function whose arguments sit on the value stack,
    /// replacing them with its results.
    fn call_host(&mut self, env: &Environment, func_index: usize) -> Result<(), Trap> {
        let host = match env.func(func_index) {
            Func::Host(host) => host,
            Func::Defined(_) => unreachable!("caller dispatched on the tag"),
        };
        let args = self.values.split_off(self.values.len() - host.sig.params.len());
        let results = (host.callback)(&host.sig, &args).map_err(|message| {
            log::debug!(
                "host function {}.{} trapped: {message}",
                host.module_name,
                host.field_name
            );
            Trap::HostTrapped
        })?;
        if results.len() != host.sig.results.len()
            || results
                .iter()
                .zip(&host.sig.results)
                .any(|(value, typ)| value.typ() != *typ)
        {
            return Err(Trap::HostTrapped);
        }
        for value in results {
            self.push_value(value)?;
        }
        Ok(())
    }

    // ---- dispatch loop ---------------------------------------------------

    fn exec(
        &mut self,
        env: &mut Environment,
        func_index: usize,
        mut trace: Option<&mut dyn Write>,
    ) -> Result<(), Trap> {
        let (mut code, mut module_index, mut arity) = match env.func(func_index) {
            Func::Defined(func) => (
                func.code.clone(),
                func.module_index,
                func.sig.results.len(),
            ),
            Func::Host(_) => unreachable!("caller dispatched on the tag"),
        };
        let mut base = self.values.len() - env.func(func_index).sig().params.len();
        let mut pc = 0;

        // Zero-initialise declared locals.
        if let Func::Defined(func) = env.func(func_index) {
            for typ in func.locals.clone() {
                self.push_value(Value::zero(typ))?;
            }
        }

        loop {
            if let Some(out) = trace.as_deref_mut() {
                let _ = writeln!(out, "#{:<2} {pc:>5}| {}", self.frames.len(), code[pc]);
            }
            let instr = &code[pc];
            pc += 1;

            match instr {
                Instr::Unreachable => return Err(Trap::Unreachable),

                Instr::Br(target) => {
                    self.branch(target);
                    pc = target.pc;
                }
                Instr::BrIf(target) => {
                    let target = *target;
                    if self.pop_i32() != 0 {
                        self.branch(&target);
                        pc = target.pc;
                    }
                }
                Instr::BrUnless(target) => {
                    let target = *target;
                    if self.pop_i32() == 0 {
                        self.branch(&target);
                        pc = target.pc;
                    }
                }
                Instr::BrTable { targets, default } => {
                    let index = self.pop_i32() as usize;
                    let target = *targets.get(index).unwrap_or(default);
                    self.branch(&target);
                    pc = target.pc;
                }

                Instr::Return => {
                    let results_start = self.values.len() - arity;
                    let results: Vec<Value> = self.values.split_off(results_start);
                    self.values.truncate(base);
                    self.values.extend(results);
                    match self.frames.pop() {
                        Some(frame) => {
                            code = frame.code;
                            pc = frame.pc;
                            base = frame.base;
                            module_index = frame.module_index;
                            arity = frame.arity;
                        }
                        None => return Ok(()),
                    }
                }

                Instr::Call { func } => {
                    let func = *func;
                    match env.func(func) {
                        Func::Host(_) => self.call_host(env, func)?,
                        Func::Defined(callee) => {
                            if self.frames.len() >= self.options.call_stack_size {
                                return Err(Trap::CallStackExhausted);
                            }
                            let callee_code = callee.code.clone();
                            let callee_module = callee.module_index;
                            let callee_arity = callee.sig.results.len();
                            let callee_params = callee.sig.params.len();
                            let callee_locals = callee.locals.clone();

                            self.frames.push(Frame {
                                code: std::mem::replace(&mut code, callee_code),
                                pc,
                                base,
                                module_index,
                                arity,
                            });
                            base = self.values.len() - callee_params;
                            module_index = callee_module;
                            arity = callee_arity;
                            pc = 0;
                            for typ in callee_locals {
                                self.push_value(Value::zero(typ))?;
                            }
                        }
                    }
                }
                Instr::CallIndirect { sig, table } => {
                    let key = self.pop_i32() as u32;
                    let func = env.table(*table).get(key)?;
                    if env.func(func).sig() != sig {
                        return Err(Trap::IndirectCallSignatureMismatch);
                    }
                    match env.func(func) {
                        Func::Host(_) => self.call_host(env, func)?,
                        Func::Defined(callee) => {
                            if self.frames.len() >= self.options.call_stack_size {
                                return Err(Trap::CallStackExhausted);
                            }
                            let callee_code = callee.code.clone();
                            let callee_module = callee.module_index;
                            let callee_arity = callee.sig.results.len();
                            let callee_params = callee.sig.params.len();
                            let callee_locals = callee.locals.clone();

                            self.frames.push(Frame {
                                code: std::mem::replace(&mut code, callee_code),
                                pc,
                                base,
                                module_index,
                                arity,
                            });
                            base = self.values.len() - callee_params;
                            module_index = callee_module;
                            arity = callee_arity;
                            pc = 0;
                            for typ in callee_locals {
                                self.push_value(Value::zero(typ))?;
                            }
                        }
                    }
                }

                Instr::Drop => {
                    self.pop_value();
                }
                Instr::Select => {
                    let cond = self.pop_i32();
                    let if_false = self.pop_value();
                    let if_true = self.pop_value();
                    self.push_value(if cond != 0 { if_true } else { if_false })?;
                }

                Instr::GetLocal { index } => {
                    let value = self.values[base + *index as usize];
                    self.push_value(value)?;
                }
                Instr::SetLocal { index } => {
                    let index = base + *index as usize;
                    let value = self.pop_value();
                    self.values[index] = value;
                }
                Instr::TeeLocal { index } => {
                    let index = base + *index as usize;
                    let value = *self.values.last().expect("validated code cannot underflow");
                    self.values[index] = value;
                }
                Instr::GetGlobal { index } => {
                    let value = env.global(*index).value;
                    self.push_value(value)?;
                }
                Instr::SetGlobal { index } => {
                    let index = *index;
                    let value = self.pop_value();
                    env.global_mut(index).value = value;
                }

                Instr::I32Load { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load32(addr, offset)? as i32;
                    self.push_i32(v)?;
                }
                Instr::I64Load { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load64(addr, offset)? as i64;
                    self.push_i64(v)?;
                }
                Instr::F32Load { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = f32::from_bits(env.memory(mem).load32(addr, offset)?);
                    self.push_f32(v)?;
                }
                Instr::F64Load { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = f64::from_bits(env.memory(mem).load64(addr, offset)?);
                    self.push_f64(v)?;
                }
                Instr::I32Load8S { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load8(addr, offset)? as i8 as i32;
                    self.push_i32(v)?;
                }
                Instr::I32Load8U { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load8(addr, offset)? as i32;
                    self.push_i32(v)?;
                }
                Instr::I32Load16S { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load16(addr, offset)? as i16 as i32;
                    self.push_i32(v)?;
                }
                Instr::I32Load16U { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load16(addr, offset)? as i32;
                    self.push_i32(v)?;
                }
                Instr::I64Load8S { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load8(addr, offset)? as i8 as i64;
                    self.push_i64(v)?;
                }
                Instr::I64Load8U { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load8(addr, offset)? as i64;
                    self.push_i64(v)?;
                }
                Instr::I64Load16S { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load16(addr, offset)? as i16 as i64;
                    self.push_i64(v)?;
                }
                Instr::I64Load16U { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load16(addr, offset)? as i64;
                    self.push_i64(v)?;
                }
                Instr::I64Load32S { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load32(addr, offset)? as i32 as i64;
                    self.push_i64(v)?;
                }
                Instr::I64Load32U { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let addr = self.pop_i32() as u32;
                    let v = env.memory(mem).load32(addr, offset)? as i64;
                    self.push_i64(v)?;
                }

                Instr::I32Store { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i32() as u32;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store32(addr, offset, value)?;
                }
                Instr::I64Store { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i64() as u64;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store64(addr, offset, value)?;
                }
                Instr::F32Store { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_f32().to_bits();
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store32(addr, offset, value)?;
                }
                Instr::F64Store { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_f64().to_bits();
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store64(addr, offset, value)?;
                }
                Instr::I32Store8 { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i32() as u8;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store8(addr, offset, value)?;
                }
                Instr::I32Store16 { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i32() as u16;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store16(addr, offset, value)?;
                }
                Instr::I64Store8 { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i64() as u8;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store8(addr, offset, value)?;
                }
                Instr::I64Store16 { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i64() as u16;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store16(addr, offset, value)?;
                }
                Instr::I64Store32 { offset } => {
                    let (offset, mem) = (*offset, memory_of(env, module_index));
                    let value = self.pop_i64() as u32;
                    let addr = self.pop_i32() as u32;
                    env.memory_mut(mem).store32(addr, offset, value)?;
                }

                Instr::CurrentMemory => {
                    let mem = memory_of(env, module_index);
                    let pages = env.memory(mem).pages() as i32;
                    self.push_i32(pages)?;
                }
                Instr::GrowMemory => {
                    let mem = memory_of(env, module_index);
                    let delta = self.pop_i32() as u32;
                    let result = env.memory_mut(mem).grow(delta);
                    self.push_i32(result)?;
                }

                Instr::I32Const(v) => self.push_i32(*v)?,
                Instr::I64Const(v) => self.push_i64(*v)?,
                Instr::F32Const(bits) => self.push_f32(f32::from_bits(*bits))?,
                Instr::F64Const(bits) => self.push_f64(f64::from_bits(*bits))?,

                Instr::I32Eqz => {
                    let v = self.pop_i32();
                    self.push_bool(v == 0)?;
                }
                Instr::I32Eq => self.i32_cmp(|a, b| a == b)?,
                Instr::I32Ne => self.i32_cmp(|a, b| a != b)?,
                Instr::I32LtS => self.i32_cmp(|a, b| a < b)?,
                Instr::I32LtU => self.i32_cmp(|a, b| (a as u32) < b as u32)?,
                Instr::I32GtS => self.i32_cmp(|a, b| a > b)?,
                Instr::I32GtU => self.i32_cmp(|a, b| a as u32 > b as u32)?,
                Instr::I32LeS => self.i32_cmp(|a, b| a <= b)?,
                Instr::I32LeU => self.i32_cmp(|a, b| a as u32 <= b as u32)?,
                Instr::I32GeS => self.i32_cmp(|a, b| a >= b)?,
                Instr::I32GeU => self.i32_cmp(|a, b| a as u32 >= b as u32)?,
                Instr::I64Eqz => {
                    let v = self.pop_i64();
                    self.push_bool(v == 0)?;
                }
                Instr::I64Eq => self.i64_cmp(|a, b| a == b)?,
                Instr::I64Ne => self.i64_cmp(|a, b| a != b)?,
                Instr::I64LtS => self.i64_cmp(|a, b| a < b)?,
                Instr::I64LtU => self.i64_cmp(|a, b| (a as u64) < b as u64)?,
                Instr::I64GtS => self.i64_cmp(|a, b| a > b)?,
                Instr::I64GtU => self.i64_cmp(|a, b| a as u64 > b as u64)?,
                Instr::I64LeS => self.i64_cmp(|a, b| a <= b)?,
                Instr::I64LeU => self.i64_cmp(|a, b| a as u64 <= b as u64)?,
                Instr::I64GeS => self.i64_cmp(|a, b| a >= b)?,
                Instr::I64GeU => self.i64_cmp(|a, b| a as u64 >= b as u64)?,
                Instr::F32Eq => self.f32_cmp(|a, b| a == b)?,
                Instr::F32Ne => self.f32_cmp(|a, b| a != b)?,
                Instr::F32Lt => self.f32_cmp(|a, b| a < b)?,
                Instr::F32Gt => self.f32_cmp(|a, b| a > b)?,
                Instr::F32Le => self.f32_cmp(|a, b| a <= b)?,
                Instr::F32Ge => self.f32_cmp(|a, b| a >= b)?,
                Instr::F64Eq => self.f64_cmp(|a, b| a == b)?,
                Instr::F64Ne => self.f64_cmp(|a, b| a != b)?,
                Instr::F64Lt => self.f64_cmp(|a, b| a < b)?,
                Instr::F64Gt => self.f64_cmp(|a, b| a > b)?,
                Instr::F64Le => self.f64_cmp(|a, b| a <= b)?,
                Instr::F64Ge => self.f64_cmp(|a, b| a >= b)?,

                Instr::I32Clz => self.i32_unop(|v| v.leading_zeros() as i32)?,
                Instr::I32Ctz => self.i32_unop(|v| v.trailing_zeros() as i32)?,
                Instr::I32Popcnt => self.i32_unop(|v| v.count_ones() as i32)?,
                Instr::I32Add => self.i32_binop(i32::wrapping_add)?,
                Instr::I32Sub => self.i32_binop(i32::wrapping_sub)?,
                Instr::I32Mul => self.i32_binop(i32::wrapping_mul)?,
                Instr::I32DivS => self.i32_binop_trap(numeric::div_s32)?,
                Instr::I32DivU => {
                    self.i32_binop_trap(|a, b| {
                        numeric::div_u32(a as u32, b as u32).map(|v| v as i32)
                    })?;
                }
                Instr::I32RemS => self.i32_binop_trap(numeric::rem_s32)?,
                Instr::I32RemU => {
                    self.i32_binop_trap(|a, b| {
                        numeric::rem_u32(a as u32, b as u32).map(|v| v as i32)
                    })?;
                }
                Instr::I32And => self.i32_binop(|a, b| a & b)?,
                Instr::I32Or => self.i32_binop(|a, b| a | b)?,
                Instr::I32Xor => self.i32_binop(|a, b| a ^ b)?,
                Instr::I32Shl => self.i32_binop(|a, b| a.wrapping_shl(b as u32))?,
                Instr::I32ShrS => self.i32_binop(|a, b| a.wrapping_shr(b as u32))?,
                Instr::I32ShrU => {
                    self.i32_binop(|a, b| ((a as u32).wrapping_shr(b as u32)) as i32)?;
                }
                Instr::I32Rotl => self.i32_binop(|a, b| a.rotate_left(b as u32 % 32))?,
                Instr::I32Rotr => self.i32_binop(|a, b| a.rotate_right(b as u32 % 32))?,
                Instr::I64Clz => self.i64_unop(|v| v.leading_zeros() as i64)?,
                Instr::I64Ctz => self.i64_unop(|v| v.trailing_zeros() as i64)?,
                Instr::I64Popcnt => self.i64_unop(|v| v.count_ones() as i64)?,
                Instr::I64Add => self.i64_binop(i64::wrapping_add)?,
                Instr::I64Sub => self.i64_binop(i64::wrapping_sub)?,
                Instr::I64Mul => self.i64_binop(i64::wrapping_mul)?,
                Instr::I64DivS => self.i64_binop_trap(numeric::div_s64)?,
                Instr::I64DivU => {
                    self.i64_binop_trap(|a, b| {
                        numeric::div_u64(a as u64, b as u64).map(|v| v as i64)
                    })?;
                }
                Instr::I64RemS => self.i64_binop_trap(numeric::rem_s64)?,
                Instr::I64RemU => {
                    self.i64_binop_trap(|a, b| {
                        numeric::rem_u64(a as u64, b as u64).map(|v| v as i64)
                    })?;
                }
                Instr::I64And => self.i64_binop(|a, b| a & b)?,
                Instr::I64Or => self.i64_binop(|a, b| a | b)?,
                Instr::I64Xor => self.i64_binop(|a, b| a ^ b)?,
                Instr::I64Shl => self.i64_binop(|a, b| a.wrapping_shl(b as u32))?,
                Instr::I64ShrS => self.i64_binop(|a, b| a.wrapping_shr(b as u32))?,
                Instr::I64ShrU => {
                    self.i64_binop(|a, b| ((a as u64).wrapping_shr(b as u32)) as i64)?;
                }
                Instr::I64Rotl => self.i64_binop(|a, b| a.rotate_left(b as u32 % 64))?,
                Instr::I64Rotr => self.i64_binop(|a, b| a.rotate_right(b as u32 % 64))?,

                Instr::F32Abs => self.f32_unop(f32::abs)?,
                Instr::F32Neg => self.f32_unop(|v| -v)?,
                Instr::F32Ceil => self.f32_unop(f32::ceil)?,
                Instr::F32Floor => self.f32_unop(f32::floor)?,
                Instr::F32Trunc => self.f32_unop(f32::trunc)?,
                Instr::F32Nearest => self.f32_unop(numeric::fnearest32)?,
                Instr::F32Sqrt => self.f32_unop(f32::sqrt)?,
                Instr::F32Add => self.f32_binop(|a, b| a + b)?,
                Instr::F32Sub => self.f32_binop(|a, b| a - b)?,
                Instr::F32Mul => self.f32_binop(|a, b| a * b)?,
                Instr::F32Div => self.f32_binop(|a, b| a / b)?,
                Instr::F32Min => self.f32_binop(numeric::fmin32)?,
                Instr::F32Max => self.f32_binop(numeric::fmax32)?,
                Instr::F32Copysign => self.f32_binop(numeric::fcopysign32)?,
                Instr::F64Abs => self.f64_unop(f64::abs)?,
                Instr::F64Neg => self.f64_unop(|v| -v)?,
                Instr::F64Ceil => self.f64_unop(f64::ceil)?,
                Instr::F64Floor => self.f64_unop(f64::floor)?,
                Instr::F64Trunc => self.f64_unop(f64::trunc)?,
                Instr::F64Nearest => self.f64_unop(numeric::fnearest64)?,
                Instr::F64Sqrt => self.f64_unop(f64::sqrt)?,
                Instr::F64Add => self.f64_binop(|a, b| a + b)?,
                Instr::F64Sub => self.f64_binop(|a, b| a - b)?,
                Instr::F64Mul => self.f64_binop(|a, b| a * b)?,
                Instr::F64Div => self.f64_binop(|a, b| a / b)?,
                Instr::F64Min => self.f64_binop(numeric::fmin64)?,
                Instr::F64Max => self.f64_binop(numeric::fmax64)?,
                Instr::F64Copysign => self.f64_binop(numeric::fcopysign64)?,

                Instr::I32WrapI64 => {
                    let v = self.pop_i64();
                    self.push_i32(v as i32)?;
                }
                Instr::I32TruncF32S => {
                    let v = self.pop_f32();
                    self.push_i32(numeric::trunc_f32_to_i32(v)?)?;
                }
                Instr::I32TruncF32U => {
                    let v = self.pop_f32();
                    self.push_i32(numeric::trunc_f32_to_u32(v)? as i32)?;
                }
                Instr::I32TruncF64S => {
                    let v = self.pop_f64();
                    self.push_i32(numeric::trunc_f64_to_i32(v)?)?;
                }
                Instr::I32TruncF64U => {
                    let v = self.pop_f64();
                    self.push_i32(numeric::trunc_f64_to_u32(v)? as i32)?;
                }
                Instr::I64ExtendI32S => {
                    let v = self.pop_i32();
                    self.push_i64(v as i64)?;
                }
                Instr::I64ExtendI32U => {
                    let v = self.pop_i32();
                    self.push_i64(v as u32 as i64)?;
                }
                Instr::I64TruncF32S => {
                    let v = self.pop_f32();
                    self.push_i64(numeric::trunc_f32_to_i64(v)?)?;
                }
                Instr::I64TruncF32U => {
                    let v = self.pop_f32();
                    self.push_i64(numeric::trunc_f32_to_u64(v)? as i64)?;
                }
                Instr::I64TruncF64S => {
                    let v = self.pop_f64();
                    self.push_i64(numeric::trunc_f64_to_i64(v)?)?;
                }
                Instr::I64TruncF64U => {
                    let v = self.pop_f64();
                    self.push_i64(numeric::trunc_f64_to_u64(v)? as i64)?;
                }
                Instr::F32ConvertI32S => {
                    let v = self.pop_i32();
                    self.push_f32(v as f32)?;
                }
                Instr::F32ConvertI32U => {
                    let v = self.pop_i32();
                    self.push_f32(v as u32 as f32)?;
                }
                Instr::F32ConvertI64S => {
                    let v = self.pop_i64();
                    self.push_f32(v as f32)?;
                }
                Instr::F32ConvertI64U => {
                    let v = self.pop_i64();
                    self.push_f32(v as u64 as f32)?;
                }
                Instr::F32DemoteF64 => {
                    let v = self.pop_f64();
                    self.push_f32(v as f32)?;
                }
                Instr::F64ConvertI32S => {
                    let v = self.pop_i32();
                    self.push_f64(v as f64)?;
                }
                Instr::F64ConvertI32U => {
                    let v = self.pop_i32();
                    self.push_f64(v as u32 as f64)?;
                }
                Instr::F64ConvertI64S => {
                    let v = self.pop_i64();
                    self.push_f64(v as f64)?;
                }
                Instr::F64ConvertI64U => {
                    let v = self.pop_i64();
                    self.push_f64(v as u64 as f64)?;
                }
                Instr::F64PromoteF32 => {
                    let v = self.pop_f32();
                    self.push_f64(v as f64)?;
                }
                Instr::I32ReinterpretF32 => {
                    let v = self.pop_f32();
                    self.push_i32(v.to_bits() as i32)?;
                }
                Instr::I64ReinterpretF64 => {
                    let v = self.pop_f64();
                    self.push_i64(v.to_bits() as i64)?;
                }
                Instr::F32ReinterpretI32 => {
                    let v = self.pop_i32();
                    self.push_f32(f32::from_bits(v as u32))?;
                }
                Instr::F64ReinterpretI64 => {
                    let v = self.pop_i64();
                    self.push_f64(f64::from_bits(v as u64))?;
                }
            }
        }
    }

    // ---- operator helpers ------------------------------------------------

    fn i32_unop(&mut self, op: impl FnOnce(i32) -> i32) -> Result<(), Trap> {
        let v = self.pop_i32();
        self.push_i32(op(v))
    }

    fn i32_binop(&mut self, op: impl FnOnce(i32, i32) -> i32) -> Result<(), Trap> {
        let rhs = self.pop_i32();
        let lhs = self.pop_i32();
        self.push_i32(op(lhs, rhs))
    }

    fn i32_binop_trap(&mut self, op: impl FnOnce(i32, i32) -> Result<i32, Trap>) -> Result<(), Trap> {
        let rhs = self.pop_i32();
        let lhs = self.pop_i32();
        self.push_i32(op(lhs, rhs)?)
    }

    fn i32_cmp(&mut self, op: impl FnOnce(i32, i32) -> bool) -> Result<(), Trap> {
        let rhs = self.pop_i32();
        let lhs = self.pop_i32();
        self.push_bool(op(lhs, rhs))
    }

    fn i64_unop(&mut self, op: impl FnOnce(i64) -> i64) -> Result<(), Trap> {
        let v = self.pop_i64();
        self.push_i64(op(v))
    }

    fn i64_binop(&mut self, op: impl FnOnce(i64, i64) -> i64) -> Result<(), Trap> {
        let rhs = self.pop_i64();
        let lhs = self.pop_i64();
        self.push_i64(op(lhs, rhs))
    }

    fn i64_binop_trap(&mut self, op: impl FnOnce(i64, i64) -> Result<i64, Trap>) -> Result<(), Trap> {
        let rhs = self.pop_i64();
        let lhs = self.pop_i64();
        self.push_i64(op(lhs, rhs)?)
    }

    fn i64_cmp(&mut self, op: impl FnOnce(i64, i64) -> bool) -> Result<(), Trap> {
        let rhs = self.pop_i64();
        let lhs = self.pop_i64();
        self.push_bool(op(lhs, rhs))
    }

    fn f32_unop(&mut self, op: impl FnOnce(f32) -> f32) -> Result<(), Trap> {
        let v = self.pop_f32();
        self.push_f32(op(v))
    }

    fn f32_binop(&mut self, op: impl FnOnce(f32, f32) -> f32) -> Result<(), Trap> {
        let rhs = self.pop_f32();
        let lhs = self.pop_f32();
        self.push_f32(op(lhs, rhs))
    }

    fn f32_cmp(&mut self, op: impl FnOnce(f32, f32) -> bool) -> Result<(), Trap> {
        let rhs = self.pop_f32();
        let lhs = self.pop_f32();
        self.push_bool(op(lhs, rhs))
    }

    fn f64_unop(&mut self, op: impl FnOnce(f64) -> f64) -> Result<(), Trap> {
        let v = self.pop_f64();
        self.push_f64(op(v))
    }

    fn f64_binop(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Result<(), Trap> {
        let rhs = self.pop_f64();
        let lhs = self.pop_f64();
        self.push_f64(op(lhs, rhs))
    }

    fn f64_cmp(&mut self, op: impl FnOnce(f64, f64) -> bool) -> Result<(), Trap> {
        let rhs = self.pop_f64();
        let lhs = self.pop_f64();
        self.push_bool(op(lhs, rhs))
    }
}

/// Look up a named export of a given kind, for the driver-facing helpers.
fn export_index(
    env: &Environment,
    module_index: usize,
    name: &str,
    kind: crate::types::ExternalKind,
) -> Result<usize, Trap> {
    let export = env
        .module(module_index)
        .find_export(name)
        .ok_or(Trap::UnknownExport)?;
    if export.kind != kind {
        return Err(Trap::ExportKindMismatch);
    }
    Ok(export.index)
}

/// Read an exported global's current value.
pub fn get_global_export(
    env: &Environment,
    module_index: usize,
    name: &str,
) -> Result<Value, Trap> {
    let index = export_index(env, module_index, name, crate::types::ExternalKind::Global)?;
    Ok(env.global(index).value)
}

/// The memory belonging to the module of the currently executing
/// function. Validation guarantees it exists for any memory instruction.
fn memory_of(env: &Environment, module_index: usize) -> usize {
    match env.module(module_index) {
        Module::Defined(module) => module.memory_index.expect("validated code has a memory"),
        Module::Host(_) => unreachable!("host modules define no code"),
    }
}

fn check_args(sig: &FuncSignature, args: &[Value]) -> Result<(), Trap> {
    if args.len() != sig.params.len()
        || args.iter().zip(&sig.params).any(|(arg, typ)| arg.typ() != *typ)
    {
        return Err(Trap::ArgumentTypeMismatch);
    }
    Ok(())
}
