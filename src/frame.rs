//! Execution frames.
//!
//! A frame binds a code stack, a data stack, and a program counter. `Frame`
//! is an explicit linked structure rather than a word stored on some data
//! stack, so the call chain can never be punned into, or corrupted via, the
//! tagged-word space.

use crate::stack::Stack;

/// One activation record.
pub struct Frame {
    parent: Option<Box<Frame>>,
    code: Stack,
    data: Stack,
    pc: usize,
}

impl Frame {
    /// The root frame: no parent, pc at the start of `code`.
    pub fn new(code: Stack, data: Stack) -> Frame {
        Frame {
            parent: None,
            code,
            data,
            pc: 0,
        }
    }

    pub fn code(&self) -> &Stack {
        &self.code
    }

    pub fn data(&self) -> &Stack {
        &self.data
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// `pc` lies in `[0, code.count]`; true exactly when the frame is about
    /// to return.
    pub fn at_end(&self) -> bool {
        self.pc >= self.code.count()
    }

    pub fn advance(&mut self) {
        self.pc += 1;
    }

    /// `DO`: call into `new_code`, sharing this frame's data stack, with
    /// `self` becoming the new frame's parent.
    pub fn call(self, new_code: Stack) -> Frame {
        let data = self.data.clone();
        Frame {
            data,
            code: new_code,
            pc: 0,
            parent: Some(Box::new(self)),
        }
    }

    /// `GO`: tail call — replaces this frame's code in place, growing no new
    /// link in the chain.
    pub fn go(&mut self, new_code: Stack) {
        self.code = new_code;
        self.pc = 0;
    }

    /// Implicit return: unwind to the parent frame, if any. `None` means the
    /// chain is now empty and the run is over.
    pub fn into_parent(self) -> Option<Frame> {
        self.parent.map(|b| *b)
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }
}
