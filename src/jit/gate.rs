//! Entry gate between Rust/C callers and native code, plus the shared exits.
//!
//! The gate is an `extern "C"` function:
//!
//! ```text
//! fn(L: *mut VmState, proto: *mut Proto, target: *const u8, ctx: *mut NativeContext) -> i32
//! ```
//!
//! It saves the callee-saved registers, reserves the native frame, loads the
//! pinned context for the frame at `L->ci` and jumps to `target`. Native code
//! leaves through `exit_continue_vm` (returns 1: resume the interpreter at
//! savedpc) or `exit_no_continue_vm` (returns 0).

use super::context::{ARG1, ARG2, ARG3, ARG4, Emitter, MachineContext};
use super::x86_64::{Mem, Reg};
use crate::layout::{NativeContext, Proto, VmState, frame, proto, state, tvalue};

/// Signature of the gate entry point.
pub type EntryFn =
    unsafe extern "C" fn(*mut VmState, *mut Proto, *const u8, *mut NativeContext) -> i32;

/// Register holding the callee prototype on entry to `continue_call_in_vm`.
pub const CONTINUE_CALL_PROTO: Reg = Reg::Rcx;

/// Emit the gate and bind the shared labels. Returns the entry offset.
pub fn emit_gate(e: &mut Emitter) -> usize {
    let entry = e.asm.offset();
    let ctx = e.ctx;

    for reg in MachineContext::SAVED {
        e.asm.push(reg);
    }
    e.asm.sub_ri(Reg::Rsp, MachineContext::FRAME_SIZE);

    e.asm.mov_rr(ctx.state, ARG1);
    e.asm.mov_rr(ctx.native, ARG4);
    e.asm.mov_rm(ctx.base, Mem::base(ctx.state, state::BASE));
    e.asm.mov_rm(ctx.constants, Mem::base(ARG2, proto::K));
    e.asm.mov_rm(Reg::Rax, Mem::base(ARG2, proto::CODE));
    e.asm.mov_mr(ctx.code, Reg::Rax);

    // closure = L->ci->func->value.gc
    e.asm.mov_rm(Reg::Rax, Mem::base(ctx.state, state::CI));
    e.asm.mov_rm(Reg::Rax, Mem::base(Reg::Rax, frame::FUNC));
    e.asm.mov_rm(Reg::Rax, Mem::base(Reg::Rax, tvalue::VALUE));
    e.asm.mov_mr(ctx.closure, Reg::Rax);

    e.asm.jmp_r(ARG3);

    let shared = e.shared;
    let epilogue = e.new_label();

    e.bind(shared.exit_continue_vm);
    e.asm.mov_r32i(Reg::Rax, 1);
    e.asm.jmp(epilogue);

    e.bind(shared.exit_no_continue_vm);
    e.asm.xor_rr32(Reg::Rax, Reg::Rax);

    e.bind(epilogue);
    e.asm.add_ri(Reg::Rsp, MachineContext::FRAME_SIZE);
    for reg in MachineContext::SAVED.iter().rev() {
        e.asm.pop(*reg);
    }
    e.asm.ret();

    // The new frame starts at the first instruction of the callee.
    e.bind(shared.continue_call_in_vm);
    e.asm.mov_rm(Reg::Rdx, Mem::base(CONTINUE_CALL_PROTO, proto::CODE));
    e.asm.mov_rm(Reg::Rax, Mem::base(ctx.state, state::CI));
    e.asm.mov_mr(Mem::base(Reg::Rax, frame::SAVEDPC), Reg::Rdx);
    e.exit_to_vm();

    entry
}
