//! SETLIST: store a run of registers into a table's array part.

use crate::bytecode::MULTRET;
use crate::jit::EmitError;
use crate::jit::context::{ARG1, ARG2, ARG3, Emitter};
use crate::jit::x86_64::{Cond, Mem, Reg, Scale, XMM0};
use crate::layout::{TVALUE_SIZE, TVALUE_SIZE_LOG2, native, state, table};

/// `SETLIST A B C aux`: `R(A)[aux + i] = R(B + i)` for `i` in `0..C-1`.
/// With `C == 0` the run extends to the stack top.
///
/// `aux` is 1-based; the byte offset of the last statically known slot must
/// fit in a 32-bit displacement.
pub fn emit_set_list(
    e: &mut Emitter,
    pc: usize,
    ra: u32,
    rb: u32,
    c: u8,
    index: u32,
) -> Result<(), EmitError> {
    let c = c as i32 - 1;
    let last = i64::from(index) + i64::from(c.max(0)) - 1;
    if index == 0 || last * i64::from(TVALUE_SIZE) > i64::from(i32::MAX) {
        return Err(EmitError::SetListOutOfRange { pc });
    }
    let index = index as i32;
    let ctx = e.ctx;

    // Callee-saved, so the dynamic byte count survives the resize call
    let count_bytes = Reg::Rbx;
    let last = Reg::Rdx;

    if c == MULTRET {
        // count_bytes = L->top - R(B)
        e.asm.mov_rm(count_bytes, e.state_field(state::TOP));
        e.asm.lea(Reg::Rax, e.reg(rb));
        e.asm.sub_rr(count_bytes, Reg::Rax);

        e.restore_top_from_frame();

        // last = index + count - 1
        e.asm.mov_rr32(last, count_bytes);
        e.asm.shr_r32i(last, TVALUE_SIZE_LOG2);
        e.asm.add_r32i(last, index - 1);
    }

    let table_reg = Reg::Rax;
    let skip_resize = e.new_label();

    e.asm.mov_rm(table_reg, e.reg(ra));

    // Resize if sizearray < last
    let sizearray = Mem::base(table_reg, table::SIZEARRAY);
    if c == MULTRET {
        e.asm.cmp_m32r(sizearray, last);
    } else {
        e.asm.cmp_m32i(sizearray, index + c - 1);
    }
    e.asm.jcc(Cond::Ae, skip_resize);

    if c != MULTRET {
        e.asm.mov_r32i(last, (index + c - 1) as u32);
    }
    debug_assert_eq!(last, ARG3);
    e.asm.mov_rr(ARG2, table_reg);
    e.asm.mov_rr(ARG1, ctx.state);
    let stale = e.call(e.helper(native::RESIZE_ARRAY));
    e.reload_base(stale);
    // The call may have run the collector
    e.asm.mov_rm(table_reg, e.reg(ra));

    e.bind(skip_resize);

    let array = Reg::Rdx;
    let offset = Reg::Rcx;

    e.asm.mov_rm(array, Mem::base(table_reg, table::ARRAY));

    if c != MULTRET && c <= e.config.setlist_unroll_limit as i32 {
        for i in 0..c {
            let dst = Mem::base(array, (index + i - 1) * TVALUE_SIZE);
            e.copy_value(dst, e.reg(rb + i as u32));
        }
    } else {
        e.asm.xor_rr32(offset, offset);
        if index != 1 {
            e.asm.add_ri(array, (index - 1) * TVALUE_SIZE);
        }

        let repeat = e.new_label();
        let done = e.new_label();

        // A static count always runs at least once
        if c == MULTRET {
            e.asm.cmp_rr(offset, count_bytes);
            e.asm.jcc(Cond::Ae, done);
        }

        e.bind(repeat);
        let src = Mem::indexed(ctx.base, offset, Scale::X1, rb as i32 * TVALUE_SIZE);
        e.copy_value(Mem::indexed(array, offset, Scale::X1, 0), src);
        e.asm.add_ri(offset, TVALUE_SIZE);
        if c == MULTRET {
            e.asm.cmp_rr(offset, count_bytes);
        } else {
            e.asm.cmp_ri(offset, c * TVALUE_SIZE);
        }
        e.asm.jcc(Cond::B, repeat);

        e.bind(done);
    }

    e.barrier_table_back(table_reg);
    Ok(())
}
