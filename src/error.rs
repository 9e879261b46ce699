//! Error model.
//!
//! Every SAM error has a stable numeric code so that `run`'s return word can
//! pack it into its low byte. Division and shift edge cases are deliberately
//! not represented here: they have defined values, not errors.

use thiserror::Error;

/// The stable numeric error codes. Kept as a free-standing enum (rather
/// than only `SamError::code()`) so a host can match on the raw wire value
/// without depending on `SamError`'s variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    Halt = 1,
    InvalidOpcode = 2,
    InvalidAddress = 3,
    StackUnderflow = 4,
    StackOverflow = 5,
    OrphanStack = 6,
    WrongType = 7,
    InvalidTrap = 8,
    TrapInit = 9,
    NoMemory = 10,
    InvalidArrayType = 11,
}

/// Fatal and controlled errors the interpreter can raise.
///
/// Fatal errors indicate structural corruption; controlled errors are a
/// normal part of program termination. Both simply stop the run — SAM never
/// attempts automatic recovery.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamError {
    /// Normal termination via the `HALT` instruction. The payload is the
    /// return code the program pushed before halting.
    #[error("halted with return code {0}")]
    Halt(isize),
    #[error("invalid opcode")]
    InvalidOpcode,
    #[error("address out of range")]
    InvalidAddress,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("item index out of range")]
    StackOverflow,
    #[error("stack reference has no other owners")]
    OrphanStack,
    #[error("word has the wrong tag for this operation")]
    WrongType,
    #[error("no trap library registered for this base")]
    InvalidTrap,
    #[error("trap library failed to initialise")]
    TrapInit,
    #[error("allocation failed")]
    NoMemory,
    #[error("invalid array/stack type")]
    InvalidArrayType,
}

impl SamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SamError::Halt(_) => ErrorCode::Halt,
            SamError::InvalidOpcode => ErrorCode::InvalidOpcode,
            SamError::InvalidAddress => ErrorCode::InvalidAddress,
            SamError::StackUnderflow => ErrorCode::StackUnderflow,
            SamError::StackOverflow => ErrorCode::StackOverflow,
            SamError::OrphanStack => ErrorCode::OrphanStack,
            SamError::WrongType => ErrorCode::WrongType,
            SamError::InvalidTrap => ErrorCode::InvalidTrap,
            SamError::TrapInit => ErrorCode::TrapInit,
            SamError::NoMemory => ErrorCode::NoMemory,
            SamError::InvalidArrayType => ErrorCode::InvalidArrayType,
        }
    }

    /// Pack this error the way the host-to-VM `run` API returns it: low byte
    /// is the error kind, remaining bits carry the return code on `Halt`.
    pub fn to_word(self) -> isize {
        let low = self.code() as isize;
        match self {
            SamError::Halt(ret) => low | (ret << crate::word::RET_SHIFT),
            _ => low,
        }
    }
}

pub type SamResult<T> = Result<T, SamError>;