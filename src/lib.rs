//! regvm-jit - x86-64 native code emission for a register-based bytecode VM.
//!
//! Functions are translated instruction by instruction into one executable
//! module. Generated code runs against the runtime through the structure
//! layouts in [`layout`] and the helper table in [`layout::NativeContext`].

pub mod bytecode;
pub mod config;
pub mod jit;
pub mod layout;
pub mod listing;

// Re-export commonly used types
pub use config::EmitConfig;
pub use jit::{EmitError, NativeModule, TranslatedModule, translate_module};
