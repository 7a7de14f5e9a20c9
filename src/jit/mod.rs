//! JIT compilation infrastructure for the register VM.
//!
//! This module provides:
//! - Executable memory allocation
//! - Code buffer for building machine code
//! - x86-64 instruction encoding
//! - The pinned machine context and VM state accessors
//! - One emitter per bytecode instruction family
//! - The entry gate and module driver

pub mod codebuf;
pub mod context;
mod emit;
pub mod gate;
pub mod labels;
pub mod memory;
pub mod translate;
pub mod x86_64;

use thiserror::Error;

use crate::bytecode::Opcode;
use memory::MemoryError;

pub use translate::{NativeFunction, NativeModule, TranslatedFunction, TranslatedModule, translate_module};

/// Errors produced while translating bytecode to native code.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("instruction {opcode:?} at pc {pc} is not supported by the native backend")]
    UnsupportedInstruction { pc: usize, opcode: Opcode },
    #[error("instruction at pc {pc} is missing its auxiliary word")]
    TruncatedInstruction { pc: usize },
    #[error("unknown opcode byte {byte:#04x} at pc {pc}")]
    UnknownOpcode { pc: usize, byte: u8 },
    #[error("fast call at pc {pc} is not followed by a matching CALL")]
    MalformedFastCall { pc: usize },
    #[error("fast call at pc {pc} names builtin {id}, outside the fast-function table")]
    UnknownBuiltin { pc: usize, id: u8 },
    #[error("SETLIST at pc {pc} stores outside the addressable array range")]
    SetListOutOfRange { pc: usize },
    #[error("jump at pc {pc} targets {target}, outside the function")]
    InvalidJumpTarget { pc: usize, target: i64 },
    #[error("label referenced but never bound")]
    UnboundLabel,
    #[error("branch displacement does not fit in 32 bits")]
    BranchOutOfRange,
    #[error(transparent)]
    Memory(#[from] MemoryError),
}
