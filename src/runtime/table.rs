//! WebAssembly table: a bounds-limited vector of function indices.
//!
//! Slots hold absolute indices into the environment's function vector, or
//! nothing at all; `call_indirect` traps on an empty slot. Element
//! segments fill slots at instantiation time after their range has been
//! checked against the current size.

use crate::types::Limits;

use super::Trap;

#[derive(Debug)]
pub struct Table {
    entries: Vec<Option<usize>>,
    limits: Limits,
}

impl Table {
    /// Create a table of `limits.initial` empty slots.
    pub fn new(limits: Limits) -> Table {
        Table {
            entries: vec![None; limits.initial as usize],
            limits,
        }
    }

    /// Current number of slots.
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Look up the function stored at `index`.
    ///
    /// # Errors
    /// - `UndefinedTableIndex` if `index` is past the end of the table.
    /// - `UninitializedElement` if the slot has never been filled.
    pub fn get(&self, index: u32) -> Result<usize, Trap> {
        match self.entries.get(index as usize) {
            None => Err(Trap::UndefinedTableIndex),
            Some(None) => Err(Trap::UninitializedElement),
            Some(Some(func_index)) => Ok(*func_index),
        }
    }

    /// Store a function index into a slot. The caller has already
    /// bounds-checked segment ranges; out-of-range single stores trap.
    pub fn set(&mut self, index: u32, func_index: usize) -> Result<(), Trap> {
        match self.entries.get_mut(index as usize) {
            None => Err(Trap::UndefinedTableIndex),
            Some(slot) => {
                *slot = Some(func_index);
                Ok(())
            }
        }
    }
}
