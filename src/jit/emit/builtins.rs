//! Inline expansions of a few builtins for the fast-call instructions.

use crate::bytecode::BuiltinId;
use crate::jit::codebuf::Label;
use crate::jit::context::Emitter;
use crate::jit::x86_64::{Reg, XMM0};
use crate::layout::tags;

/// ROUNDSD immediates: rounding mode plus "suppress precision exception".
const ROUND_FLOOR: u8 = 0x09;
const ROUND_CEIL: u8 = 0x0A;

/// Try to expand builtin `id` inline for the given call shape.
///
/// Returns the number of results written at `ra`, or `None` when the shape
/// is not handled; nothing is emitted in that case. Argument values that the
/// expansion cannot handle branch to `fallback`.
pub fn emit_builtin(
    e: &mut Emitter,
    id: BuiltinId,
    nparams: i32,
    ra: u32,
    arg: u32,
    nresults: i32,
    fallback: Label,
) -> Option<i32> {
    match id {
        BuiltinId::Assert => {
            if nparams < 1 || nresults != 0 {
                return None;
            }
            let ok = e.new_label();
            e.jump_if_falsy(arg, fallback, ok);
            e.bind(ok);
            Some(0)
        }
        BuiltinId::MathAbs | BuiltinId::MathFloor | BuiltinId::MathCeil | BuiltinId::MathSqrt => {
            if nparams < 1 || nresults > 1 {
                return None;
            }
            let (dst, src) = (e.reg(ra), e.reg(arg));
            e.jump_if_tag_is_not(e.reg_tag(arg), tags::NUMBER, fallback);

            match id {
                BuiltinId::MathAbs => {
                    // Clear the sign bit
                    e.asm.mov_rm(Reg::Rax, src);
                    e.asm.shl_ri(Reg::Rax, 1);
                    e.asm.shr_ri(Reg::Rax, 1);
                    e.asm.mov_mr(dst, Reg::Rax);
                }
                BuiltinId::MathSqrt => {
                    e.asm.sqrtsd_xm(XMM0, src);
                    e.asm.movsd_mx(dst, XMM0);
                }
                _ => {
                    let mode = if id == BuiltinId::MathFloor { ROUND_FLOOR } else { ROUND_CEIL };
                    e.asm.movsd_xm(XMM0, src);
                    e.asm.roundsd(XMM0, XMM0, mode);
                    e.asm.movsd_mx(dst, XMM0);
                }
            }
            e.set_tag(dst, tags::NUMBER);
            Some(1)
        }
        _ => None,
    }
}
