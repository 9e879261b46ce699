//! Trap interface.
//!
//! A trap number's high bits select a library base; the low byte selects a
//! function within it ([`crate::word::TRAP_BASE_MASK`]). Libraries are
//! registered up front and see the running frame's data stack directly —
//! they may mutate it freely but must not retain a reference to it beyond
//! the call, and must not call back into the interpreter.

use std::collections::HashMap;

use crate::error::{SamError, SamResult};
use crate::stack::Stack;
use crate::word::TRAP_BASE_MASK;

/// A pluggable trap library: sees the entire VM state and may freely
/// mutate the data stack through the stack API.
pub trait TrapLibrary {
    /// Invoke `function` (the full trap number, not yet masked to the
    /// library's local range) against `data`.
    fn call(&mut self, data: &Stack, function: usize) -> SamResult<()>;

    /// Diagnostic name for `function`, used only by `log` call sites — the
    /// ambient-logging replacement for the excluded debug pretty-printer.
    fn name(&self, function: usize) -> Option<&'static str> {
        let _ = function;
        None
    }
}

/// Maps trap bases to the library registered for them.
#[derive(Default)]
pub struct TrapTable {
    libraries: HashMap<usize, Box<dyn TrapLibrary>>,
}

impl TrapTable {
    pub fn new() -> Self {
        TrapTable {
            libraries: HashMap::new(),
        }
    }

    /// Registers `library` under a fixed base prefix. `base` must already
    /// be masked to `TRAP_BASE_MASK`'s shape; the low byte of `base` is
    /// ignored by dispatch regardless.
    pub fn register(&mut self, base: usize, library: Box<dyn TrapLibrary>) {
        self.libraries.insert(base & TRAP_BASE_MASK, library);
    }

    pub fn dispatch(&mut self, data: &Stack, function: usize) -> SamResult<()> {
        let base = function & TRAP_BASE_MASK;
        let lib = self.libraries.get_mut(&base).ok_or(SamError::InvalidTrap)?;
        log::trace!(
            "trap base {:#x} function {:#x} ({})",
            base,
            function,
            lib.name(function).unwrap_or("?")
        );
        lib.call(data, function)
    }
}
