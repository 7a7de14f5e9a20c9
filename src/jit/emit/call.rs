//! CALL and RETURN: crossing between functions without the interpreter.

use crate::bytecode::MULTRET;
use crate::jit::context::{ARG1, ARG2, ARG3, ARG4, Emitter};
use crate::jit::gate::CONTINUE_CALL_PROTO;
use crate::jit::x86_64::{Cond, Mem, Reg, Scale, XMM0};
use crate::layout::{
    FRAME_RETURN, TVALUE_SIZE, TVALUE_SIZE_LOG2, closure, frame, native, native_proto, proto,
    state, tags, tvalue,
};

/// `CALL A B C`: call `R(A)` with `B - 1` arguments, expecting `C - 1` results.
pub fn emit_call(e: &mut Emitter, pcpos: usize, ra: u32, b: u8, c: u8) {
    let nparams = b as i32 - 1;
    let nresults = c as i32 - 1;
    let ctx = e.ctx;

    e.interrupt(pcpos);
    e.set_saved_pc(pcpos + 1);

    // callee = call_prolog(L, ra, argtop, nresults)
    e.asm.mov_rr(ARG1, ctx.state);
    e.asm.lea(ARG2, e.reg(ra));
    if nparams == MULTRET {
        e.asm.mov_rm(ARG3, e.state_field(state::TOP));
    } else {
        e.asm.lea(ARG3, e.reg(ra + 1 + nparams as u32));
    }
    e.asm.mov_r32i(ARG4, nresults as u32);
    let stale = e.call(e.helper(native::CALL_PROLOG));
    e.reload_base(stale);
    let ccl = Reg::Rax;

    let foreign = e.new_label();
    e.asm.test_m8i(Mem::base(ccl, closure::IS_C), 1);
    e.asm.jcc(Cond::Ne, foreign);

    {
        let proto_reg = CONTINUE_CALL_PROTO;
        let ci = Reg::Rdx;
        let argi = Reg::Rsi;
        let argend = Reg::Rdi;

        e.asm.mov_rm(proto_reg, Mem::base(ccl, closure::PROTO));
        e.asm.mov_mr(ctx.closure, ccl);
        e.asm.mov_rm(ci, e.state_field(state::CI));

        // Nil-fill missing fixed parameters: argi = L->top, argend = base + numparams
        e.asm.mov_rm(argi, e.state_field(state::TOP));
        e.asm.movzx_r32m8(Reg::Rax, Mem::base(proto_reg, proto::NUMPARAMS));
        e.asm.shl_r32i(Reg::Rax, TVALUE_SIZE_LOG2);
        e.asm.lea(argend, Mem::indexed(ctx.base, Reg::Rax, Scale::X1, 0));

        let fill_nil = e.new_label();
        let fill_done = e.new_label();
        e.bind(fill_nil);
        e.asm.cmp_rr(argi, argend);
        e.asm.jcc(Cond::Ae, fill_done);
        e.asm.mov_m32i(Mem::base(argi, tvalue::TT), tags::NIL);
        e.asm.add_ri(argi, TVALUE_SIZE);
        e.asm.jmp(fill_nil);
        e.bind(fill_done);

        // L->top = ci->top, or the argument cursor for vararg callees
        e.asm.mov_rm(Reg::Rax, Mem::base(ci, frame::TOP));
        e.asm.mov_mr(e.state_field(state::TOP), Reg::Rax);

        e.asm.mov_rm(Reg::Rax, Mem::base(proto_reg, proto::EXEC_DATA));

        let fixed = e.new_label();
        e.asm.test_m8i(Mem::base(proto_reg, proto::IS_VARARG), 1);
        e.asm.jcc(Cond::E, fixed);
        e.asm.mov_mr(e.state_field(state::TOP), argi);
        e.bind(fixed);

        e.asm.test_rr(Reg::Rax, Reg::Rax);
        e.asm.jcc(Cond::E, e.shared.continue_call_in_vm);

        e.asm.mov_rm(ctx.constants, Mem::base(proto_reg, proto::K));
        e.asm.mov_rm(Reg::Rdx, Mem::base(proto_reg, proto::CODE));
        e.asm.mov_mr(ctx.code, Reg::Rdx);

        e.asm.jmp_m(Mem::base(Reg::Rax, native_proto::ENTRY_TARGET));
    }

    e.bind(foreign);

    // results = ccl->cfunction(L)
    e.asm.mov_rr(ARG1, ctx.state);
    let stale = e.call(Mem::base(ccl, closure::CFUNCTION));
    let results = Reg::Rax;

    e.asm.test_rr32(results, results);
    e.asm.jcc(Cond::L, e.shared.exit_no_continue_vm);

    if nresults != 0 && nresults != 1 {
        e.asm.mov_rr(ARG1, ctx.state);
        e.asm.mov_r32i(ARG2, nresults as u32);
        e.asm.mov_rr32(ARG3, results);
        let stale = e.call_again(stale, e.helper(native::CALL_EPILOG_C));
        e.reload_base(stale);
        return;
    }

    let ci = Reg::Rdx;
    let cip = Reg::Rcx;
    let vali = Reg::Rsi;

    e.asm.mov_rm(ci, e.state_field(state::CI));
    e.asm.mov_rm(cip, Mem::base(ci, frame::PREV));
    e.restore_base_from_frame(stale, cip);

    if nresults == 1 {
        // Copy from L->top - results; a missing result becomes nil
        e.asm.mov_rm(vali, e.state_field(state::TOP));
        e.asm.shl_r32i(results, TVALUE_SIZE_LOG2);
        e.asm.sub_rr(vali, results);
        e.asm.movups_xm(XMM0, Mem::base(vali, 0));
        e.asm.movups_mx(e.reg(ra), XMM0);

        let has_result = e.new_label();
        e.asm.test_rr32(results, results);
        e.asm.jcc(Cond::Ne, has_result);
        e.asm.mov_m32i(e.reg_tag(ra), tags::NIL);
        e.bind(has_result);
    }

    // L->ci = cip; L->top = cip->top
    e.asm.mov_mr(e.state_field(state::CI), cip);
    e.asm.mov_rm(Reg::Rax, Mem::base(cip, frame::TOP));
    e.asm.mov_mr(e.state_field(state::TOP), Reg::Rax);
}

/// `RETURN A B`: return `B - 1` values starting at `R(A)`.
pub fn emit_return(e: &mut Emitter, pcpos: usize, ra: u32, b: u8) {
    let b = b as i32 - 1;
    let ctx = e.ctx;

    e.interrupt(pcpos);

    let ci = Reg::R8;
    let cip = Reg::R9;
    let res = Reg::Rdi;
    let nresults = Reg::Rsi;
    let counter = Reg::Rcx;

    e.asm.mov_rm(ci, e.state_field(state::CI));
    e.asm.mov_rm(cip, Mem::base(ci, frame::PREV));
    // Results go where the function value was
    e.asm.mov_rm(res, Mem::base(ci, frame::FUNC));
    e.asm.mov_r32m(nresults, Mem::base(ci, frame::NRESULTS));

    let copy_done = e.new_label();
    match b {
        0 => {
            e.asm.test_rr32(nresults, nresults);
            e.asm.jcc(Cond::Le, copy_done);
            e.asm.mov_rr32(counter, nresults);
            emit_nil_fill(e, res, counter);
        }
        1 => {
            e.asm.test_rr32(nresults, nresults);
            e.asm.jcc(Cond::E, copy_done);
            e.asm.mov_rr32(counter, nresults);
            e.asm.dec32(counter);

            e.copy_value(Mem::base(res, 0), e.reg(ra));
            e.asm.add_ri(res, TVALUE_SIZE);

            e.asm.test_rr32(counter, counter);
            e.asm.jcc(Cond::Le, copy_done);
            emit_nil_fill(e, res, counter);
        }
        _ => {
            let vali = Reg::Rax;
            let valend = Reg::Rdx;

            e.asm.test_rr32(nresults, nresults);
            e.asm.jcc(Cond::E, copy_done);

            e.asm.lea(vali, e.reg(ra));
            if b == MULTRET {
                e.asm.mov_rm(valend, e.state_field(state::TOP));
            } else {
                e.asm.lea(valend, e.reg(ra + b as u32));
            }
            e.asm.mov_rr32(counter, nresults);

            // Copy at most nresults values; a negative count never reaches zero
            let copy_loop = e.new_label();
            let copy_exit = e.new_label();
            e.bind(copy_loop);
            e.asm.cmp_rr(vali, valend);
            e.asm.jcc(Cond::Ae, copy_exit);
            e.copy_value(Mem::base(res, 0), Mem::base(vali, 0));
            e.asm.add_ri(vali, TVALUE_SIZE);
            e.asm.add_ri(res, TVALUE_SIZE);
            e.asm.dec32(counter);
            e.asm.jcc(Cond::Ne, copy_loop);
            e.bind(copy_exit);

            e.asm.test_rr32(counter, counter);
            e.asm.jcc(Cond::Le, copy_done);
            emit_nil_fill(e, res, counter);
        }
    }
    e.bind(copy_done);

    // Pop the frame
    e.asm.mov_mr(e.state_field(state::CI), cip);
    e.asm.mov_rm(ctx.base, Mem::base(cip, frame::BASE));
    e.asm.mov_mr(e.state_field(state::BASE), ctx.base);
    e.asm.mov_mr(e.state_field(state::TOP), res);

    e.asm.test_m8i(Mem::base(ci, frame::FLAGS), FRAME_RETURN as u8);
    e.asm.jcc(Cond::Ne, e.shared.exit_no_continue_vm);

    let variable = e.new_label();
    e.asm.test_rr32(nresults, nresults);
    e.asm.jcc(Cond::L, variable);
    e.asm.mov_rm(Reg::Rax, Mem::base(cip, frame::TOP));
    e.asm.mov_mr(e.state_field(state::TOP), Reg::Rax);
    e.bind(variable);

    // Switch to the caller's closure, constants and code
    let proto_reg = Reg::Rcx;
    let exec_data = Reg::Rbx;

    e.asm.mov_rm(Reg::Rax, Mem::base(cip, frame::FUNC));
    e.asm.mov_rm(Reg::Rax, Mem::base(Reg::Rax, tvalue::VALUE));
    e.asm.mov_mr(ctx.closure, Reg::Rax);
    e.asm.mov_rm(proto_reg, Mem::base(Reg::Rax, closure::PROTO));

    e.asm.mov_rm(exec_data, Mem::base(proto_reg, proto::EXEC_DATA));
    e.asm.test_rr(exec_data, exec_data);
    e.asm.jcc(Cond::E, e.shared.exit_continue_vm);

    e.asm.mov_rm(ctx.constants, Mem::base(proto_reg, proto::K));
    e.asm.mov_rm(Reg::Rdx, Mem::base(proto_reg, proto::CODE));
    e.asm.mov_mr(ctx.code, Reg::Rdx);

    // Byte offset of savedpc is index * 4; targets are index * 8
    e.asm.mov_rm(Reg::Rax, Mem::base(cip, frame::SAVEDPC));
    e.asm.sub_rr(Reg::Rax, Reg::Rdx);
    e.asm.mov_rm(Reg::Rdx, Mem::base(exec_data, native_proto::INST_TARGETS));
    e.asm.jmp_m(Mem::indexed(Reg::Rdx, Reg::Rax, Scale::X2, 0));
}

/// Write nil into `counter` (> 0) consecutive slots starting at `res`.
fn emit_nil_fill(e: &mut Emitter, res: Reg, counter: Reg) {
    let repeat = e.new_label();
    e.bind(repeat);
    e.asm.mov_m32i(Mem::base(res, tvalue::TT), tags::NIL);
    e.asm.add_ri(res, TVALUE_SIZE);
    e.asm.dec32(counter);
    e.asm.jcc(Cond::Ne, repeat);
}
