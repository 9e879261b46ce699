//! SAM: a stack-based virtual machine whose program is its own initial
//! stack. Code, data, and sub-stacks all live in the same tagged-word
//! container; see [`word`] for the encoding, [`stack`] for the container,
//! [`frame`] for the call chain, and [`dispatch`] for the interpreter loop.
//!
//! This crate is the core interpreter only. Source-level parsing, program
//! loading from a file, the host CLI, and debug pretty-printing are left to
//! callers.

pub mod dispatch;
pub mod error;
pub mod frame;
pub mod stack;
pub mod trap;
pub mod traps;
pub mod word;

use error::SamResult;
use frame::Frame;
use stack::{Stack, StackKind};
use trap::TrapTable;
use traps::math::MathLibrary;
use word::{Inst, Word};

/// Tunables for a `State` that have no bearing on interpreter semantics.
pub struct Config {
    /// Initial capacity reserved for freshly created stacks.
    pub initial_capacity: usize,
    /// Called after every fetched word is fully executed. Must not mutate
    /// any stack; typically used to keep a UI responsive while a trap
    /// library drives a window.
    pub event_poll: Option<Box<dyn FnMut() -> SamResult<()>>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            initial_capacity: 1,
            event_poll: None,
        }
    }
}

/// The whole of a running (or not-yet-started) machine: the current frame,
/// the trap registry, and configuration.
pub struct State {
    frame: Option<Frame>,
    traps: TrapTable,
    config: Config,
}

impl State {
    /// An empty state with the built-in math library registered. No
    /// program is installed yet.
    pub fn new(config: Config) -> State {
        let mut traps = TrapTable::new();
        traps.register(traps::math::BASE, Box::new(MathLibrary));
        State {
            frame: None,
            traps,
            config,
        }
    }

    /// Registers a trap library under `base` — this is how a host plugs in
    /// `traps::graphics::BASE` (or any other library) without the core
    /// depending on it.
    pub fn register_trap(&mut self, base: usize, library: Box<dyn trap::TrapLibrary>) {
        self.traps.register(base, library);
    }

    /// Installs the root code and data stacks and creates the root frame.
    pub fn set_program(&mut self, code: Stack, data: Stack) {
        self.frame = Some(Frame::new(code, data));
    }

    /// The current frame, if a program is installed and the run hasn't
    /// emptied the frame chain. Stays populated after a `Halt` or fatal
    /// error, so a host can inspect the final data stack.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    pub fn new_stack(&self) -> Stack {
        Stack::with_capacity(StackKind::StackArray, self.config.initial_capacity)
    }
}

/// Convenience encode-then-push builders. These are free functions (rather
/// than more `Stack` methods) because they're encode-then-push pairs, not
/// structural stack operations.
pub fn push_int(s: &Stack, v: isize) -> SamResult<()> {
    s.push(word::encode_int(v))
}

pub fn push_float(s: &Stack, v: f64) -> SamResult<()> {
    s.push(word::encode_float(v))
}

pub fn push_ref(s: &Stack, target: &Stack) -> SamResult<()> {
    s.push(target.as_word())
}

pub fn push_trap(s: &Stack, function: usize) -> SamResult<()> {
    s.push(word::encode_trap(function))
}

pub fn push_insts(s: &Stack, insts: &[Inst]) -> SamResult<()> {
    s.push(word::encode_insts(insts)?)
}

/// A stack-reference word pointing at `target`, for embedding a sub-stack
/// literal directly inside another stack's buffer.
pub fn ref_word(target: &Stack) -> Word {
    target.as_word()
}
