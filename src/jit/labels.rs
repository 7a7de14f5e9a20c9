//! Labels shared by every emitter and the outcome of emitting one instruction.

use super::codebuf::{CodeBuffer, Label};

/// Module-wide continuation points, bound once by the entry gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedLabels {
    /// Leave native code; the interpreter resumes at `L->ci->savedpc`.
    pub exit_continue_vm: Label,
    /// Leave native code; the interpreter must not resume this frame.
    pub exit_no_continue_vm: Label,
    /// Enter a freshly prepared frame whose function has no native code.
    /// Expects the callee prototype in rcx.
    pub continue_call_in_vm: Label,
}

impl SharedLabels {
    pub fn new(buf: &mut CodeBuffer) -> Self {
        Self {
            exit_continue_vm: buf.new_label(),
            exit_no_continue_vm: buf.new_label(),
            continue_call_in_vm: buf.new_label(),
        }
    }
}

/// How control leaves the code emitted for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Falls through to the next instruction.
    Next,
    /// Continues at the given label; the driver appends the jump.
    JumpTo(Label),
    /// Every path already transferred control elsewhere.
    Leave,
}
