//! Generic-for iteration: FORGLOOP fast path and fallbacks, FORGPREP.
//!
//! Loop control registers: `R(A)` generator (nil for builtin table
//! traversal), `R(A+1)` the table, `R(A+2)` the next array index stored as a
//! light userdata. Loop variables start at `R(A+3)`.

use crate::jit::codebuf::Label;
use crate::jit::context::{ARG1, ARG2, ARG3, ARG4, Emitter};
use crate::jit::x86_64::{Cond, Mem, Reg, XMM0};
use crate::layout::{TVALUE_SIZE, TVALUE_SIZE_LOG2, native, table, tags, tvalue};

/// Sign bit of the aux word selects ipairs-style traversal.
const AUX_IPAIRS: u32 = 1 << 31;

/// Low byte of the aux word holds the number of loop variables.
const AUX_VARS_MASK: u32 = 0xff;

/// One loop step: jump to `repeat` with the next (key, value), fall through
/// when the loop is over.
///
/// Array holes are skipped, then the hash part is walked by a runtime
/// helper. In ipairs mode the first hole or the end of the array part ends
/// the loop instead.
pub fn emit_forg_loop(
    e: &mut Emitter,
    pcpos: usize,
    ra: u32,
    aux: u32,
    repeat: Label,
    exit: Label,
    fallback: Label,
) {
    e.interrupt(pcpos);

    e.jump_if_tag_is_not(e.reg_tag(ra), tags::NIL, fallback);
    e.jump_if_tag_is_not(e.reg_tag(ra + 1), tags::TABLE, fallback);

    // Chosen so the node iteration helper finds them in place
    let table_reg = ARG2;
    let index = ARG3;
    let elem = Reg::Rax;

    e.asm.mov_rm(table_reg, e.reg(ra + 1));
    e.asm.mov_rm(index, e.reg(ra + 2));

    // elem = &array[index]
    e.asm.mov_rr32(elem, index);
    e.asm.shl_r32i(elem, TVALUE_SIZE_LOG2);
    e.asm.add_rm(elem, Mem::base(table_reg, table::ARRAY));

    // A found element only supplies (key, value)
    let vars = aux & AUX_VARS_MASK;
    for i in 2..vars {
        e.set_tag(e.reg(ra + 3 + i), tags::NIL);
    }

    let ipairs = aux & AUX_IPAIRS != 0;
    let skip_array = e.new_label();
    let skip_nil = e.new_label();

    let array_loop = e.new_label();
    e.bind(array_loop);
    e.asm.cmp_r32m(index, Mem::base(table_reg, table::SIZEARRAY));
    e.asm.jcc(Cond::Ae, if ipairs { exit } else { skip_array });

    e.asm.inc(index);

    e.jump_if_tag_is(Mem::base(elem, tvalue::TT), tags::NIL, if ipairs { exit } else { skip_nil });

    // R(A+2) = index + 1; the light userdata tag is already there
    e.asm.mov_mr(e.reg(ra + 2), index);

    // R(A+3) = index + 1 as a number
    e.asm.cvtsi2sd_r32(XMM0, index);
    e.asm.movsd_mx(e.reg(ra + 3), XMM0);
    e.set_tag(e.reg(ra + 3), tags::NUMBER);

    // R(A+4) = array[index]
    e.copy_value(e.reg(ra + 4), Mem::base(elem, 0));

    e.asm.jmp(repeat);

    if ipairs {
        return;
    }

    e.bind(skip_nil);
    e.asm.add_ri(elem, TVALUE_SIZE);
    e.asm.jmp(array_loop);

    e.bind(skip_array);
    e.asm.mov_rr(ARG1, e.ctx.state);
    e.asm.lea(ARG4, e.reg(ra));
    let stale = e.call(e.helper(native::FORG_LOOP_NODE_ITER));
    e.reload_base(stale);
    e.asm.test_rr8(Reg::Rax, Reg::Rax);
    e.asm.jcc(Cond::Ne, repeat);
}

/// Loop step over anything but a plain table, through the runtime.
/// Falls through when the loop is over.
pub fn emit_forg_loop_fallback(e: &mut Emitter, pcpos: usize, ra: u32, aux: u32, repeat: Label) {
    e.set_saved_pc(pcpos + 1);

    e.asm.mov_rr(ARG1, e.ctx.state);
    e.asm.mov_r32i(ARG2, ra);
    e.asm.mov_r32i(ARG3, aux);
    let stale = e.call(e.helper(native::FORG_LOOP_NON_TABLE_FALLBACK));
    e.reload_base(stale);
    e.asm.test_rr8(Reg::Rax, Reg::Rax);
    e.asm.jcc(Cond::Ne, repeat);
}

/// Validate the iterated value and set up the loop control registers.
pub fn emit_forg_prep(e: &mut Emitter, pcpos: usize, ra: u32) {
    e.set_saved_pc(pcpos + 1);

    e.asm.mov_rr(ARG1, e.ctx.state);
    e.asm.lea(ARG2, e.reg(ra));
    e.asm.mov_r32i(ARG3, pcpos as u32 + 1);
    let stale = e.call(e.helper(native::FORG_PREP_FALLBACK));
    e.reload_base(stale);
}
