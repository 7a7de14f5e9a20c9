//! FASTCALL family: builtin calls that skip the generic call machinery.
//!
//! A fast-call instruction is followed (after `C` setup instructions) by the
//! regular CALL it accelerates. On success control resumes after that CALL;
//! on failure it falls through into the setup code and the CALL runs normally.

use super::InstSite;
use super::builtins::emit_builtin;
use crate::bytecode::{BUILTIN_COUNT, BuiltinId, Insn, MULTRET, Opcode, op_byte};
use crate::jit::EmitError;
use crate::jit::codebuf::Label;
use crate::jit::context::{ARG1, ARG2, ARG3, ARG4, ARG5, ARG6, Emitter};
use crate::jit::labels::Outcome;
use crate::jit::x86_64::{Cond, Mem, Reg, Scale};
use crate::layout::{TVALUE_SIZE, TVALUE_SIZE_LOG2, native, state};

/// Argument layout of one fast call.
struct FastCallArgs {
    /// Number of arguments, or `MULTRET` for "up to the stack top".
    nparams: i32,
    /// Register of the first argument.
    arg: u32,
    /// Where the remaining arguments live, if any.
    rest: Option<Mem>,
}

pub fn emit_fast_call(e: &mut Emitter, site: &InstSite) -> Result<Outcome, EmitError> {
    let bfid = site.insn.a();
    if bfid as usize >= BUILTIN_COUNT {
        return Err(EmitError::UnknownBuiltin {
            pc: site.pc,
            id: bfid,
        });
    }
    let call_pc = site.pc + site.insn.c() as usize + 1;

    let call_word = *site
        .code
        .get(call_pc)
        .ok_or(EmitError::MalformedFastCall { pc: site.pc })?;
    if Opcode::from_u8(op_byte(call_word)) != Some(Opcode::Call) {
        return Err(EmitError::MalformedFastCall { pc: site.pc });
    }
    let call = Insn {
        word: call_word,
        aux: None,
    };
    let ra = call.a() as u32;
    let nresults = call.c() as i32 - 1;

    let args = match site.op {
        Opcode::FastCall1 => FastCallArgs {
            nparams: 1,
            arg: site.insn.b() as u32,
            rest: None,
        },
        Opcode::FastCall2 => FastCallArgs {
            nparams: 2,
            arg: site.insn.b() as u32,
            rest: Some(e.reg(site.insn.aux())),
        },
        Opcode::FastCall2K => FastCallArgs {
            nparams: 2,
            arg: site.insn.b() as u32,
            rest: Some(e.constant(site.insn.aux())),
        },
        _ => FastCallArgs {
            nparams: call.b() as i32 - 1,
            arg: ra + 1,
            rest: Some(e.reg(ra + 2)),
        },
    };

    let success = site
        .label_at(call_pc as i64 + 1)
        .map_err(|_| EmitError::MalformedFastCall { pc: site.pc })?;
    let fallback = site.next();

    emit_fast_call_n(e, site.pc, bfid, ra, nresults, &args, fallback);
    Ok(Outcome::JumpTo(success))
}

fn emit_fast_call_n(
    e: &mut Emitter,
    pcpos: usize,
    bfid: u8,
    ra: u32,
    nresults: i32,
    args: &FastCallArgs,
    fallback: Label,
) {
    let ctx = e.ctx;

    if e.config.inline_builtins {
        let inlined = BuiltinId::from_u8(bfid)
            .and_then(|id| emit_builtin(e, id, args.nparams, ra, args.arg, nresults, fallback));
        if let Some(count) = inlined {
            emit_fix_top(e, ra, nresults, args.nparams, Some(count));
            return;
        }
    }

    e.set_saved_pc(pcpos + 1);

    e.asm.mov_rm(Reg::Rax, e.helper(native::fast_function(bfid)));
    e.asm.test_rr(Reg::Rax, Reg::Rax);
    e.asm.jcc(Cond::E, fallback);

    match args.rest {
        Some(rest) => e.asm.lea(ARG5, rest),
        None => e.asm.xor_rr32(ARG5, ARG5),
    }

    if args.nparams == MULTRET {
        // (L->top - (ra + 1)) / sizeof(TValue)
        e.asm.mov_rm(ARG6, e.state_field(state::TOP));
        e.asm.lea(Reg::Rdx, e.reg(ra + 1));
        e.asm.sub_rr(ARG6, Reg::Rdx);
        e.asm.shr_ri(ARG6, TVALUE_SIZE_LOG2);
    } else {
        e.asm.mov_r32i(ARG6, args.nparams as u32);
    }

    e.asm.mov_rr(ARG1, ctx.state);
    e.asm.lea(ARG2, e.reg(ra));
    e.asm.lea(ARG3, e.reg(args.arg));
    e.asm.mov_r32i(ARG4, nresults as u32);

    let stale = e.call_reg(Reg::Rax);
    e.reload_base(stale);

    e.asm.test_rr32(Reg::Rax, Reg::Rax);
    e.asm.jcc(Cond::L, fallback);

    emit_fix_top(e, ra, nresults, args.nparams, None);
}

/// Restore `L->top` after a successful fast call.
///
/// With a variable result count top follows the produced results (`count`
/// when known statically, else eax). With variable arguments top goes back to
/// the frame's top.
fn emit_fix_top(e: &mut Emitter, ra: u32, nresults: i32, nparams: i32, count: Option<i32>) {
    if nresults == MULTRET {
        match count {
            Some(count) => {
                e.asm.lea(Reg::Rax, e.reg(ra + count as u32));
            }
            None => {
                e.asm.mov_rr32(Reg::Rax, Reg::Rax);
                e.asm.shl_ri(Reg::Rax, TVALUE_SIZE_LOG2);
                let base = e.ctx.base;
                e.asm.lea(
                    Reg::Rax,
                    Mem::indexed(base, Reg::Rax, Scale::X1, ra as i32 * TVALUE_SIZE),
                );
            }
        }
        e.asm.mov_mr(e.state_field(state::TOP), Reg::Rax);
    } else if nparams == MULTRET {
        e.restore_top_from_frame();
    }
}
