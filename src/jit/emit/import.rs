//! GETIMPORT: cached global/module lookup with a resolver fallback.

use crate::jit::context::{ARG1, ARG2, ARG3, ARG4, ARG5, Emitter};
use crate::jit::x86_64::{Cond, Mem, Reg, XMM0};
use crate::layout::{TVALUE_SIZE, closure, native, state, table, tags};

/// `GETIMPORT A D aux`: `R(A) = K(D)` when the constant holds the resolved
/// import and the environment is still safe; otherwise resolve `aux`.
pub fn emit_get_import(e: &mut Emitter, pcpos: usize, ra: u32, k: u32, aux: u32) {
    let slow = e.new_label();
    let done = e.new_label();
    let ctx = e.ctx;

    e.jump_if_tag_is(e.constant_tag(k), tags::NIL, slow);
    e.asm.mov_rm(Reg::Rax, ctx.closure);
    e.asm.mov_rm(Reg::Rax, Mem::base(Reg::Rax, closure::ENV));
    e.asm.test_m8i(Mem::base(Reg::Rax, table::SAFEENV), 1);
    e.asm.jcc(Cond::E, slow);

    e.copy_value(e.reg(ra), e.constant(k));
    e.asm.jmp(done);

    e.bind(slow);
    e.set_saved_pc(pcpos + 1);
    emit_get_import_fallback(e, ra, aux);

    e.bind(done);
}

/// Resolve `aux` through the runtime; the resolver leaves its result on the
/// stack top, which is popped into `R(A)`.
pub fn emit_get_import_fallback(e: &mut Emitter, ra: u32, aux: u32) {
    let ctx = e.ctx;

    e.asm.mov_rm(Reg::Rax, ctx.closure);

    // get_import(L, cl->env, k, aux, false)
    e.asm.mov_rr(ARG1, ctx.state);
    e.asm.mov_rm(ARG2, Mem::base(Reg::Rax, closure::ENV));
    e.asm.mov_rr(ARG3, ctx.constants);
    e.asm.mov_r32i(ARG4, aux);
    e.asm.xor_rr32(ARG5, ARG5);
    let stale = e.call(e.helper(native::GET_IMPORT));
    e.reload_base(stale);

    // R(A) = *--L->top
    e.asm.mov_rm(Reg::Rax, e.state_field(state::TOP));
    e.asm.sub_ri(Reg::Rax, TVALUE_SIZE);
    e.asm.movups_xm(XMM0, Mem::base(Reg::Rax, 0));
    e.asm.movups_mx(e.reg(ra), XMM0);
    e.asm.mov_mr(e.state_field(state::TOP), Reg::Rax);
}
