//! Short-circuit AND / OR with a register or constant right-hand side.
//!
//! `ra = rb and c` keeps `rb` when it is falsy, `ra = rb or c` keeps it when
//! it is truthy; otherwise `c` is copied. The left operand is tested once.

use crate::jit::codebuf::Label;
use crate::jit::context::Emitter;
use crate::jit::x86_64::Mem;

pub fn emit_and(e: &mut Emitter, ra: u32, rb: u32, rhs: Mem) {
    let keep_left = e.new_label();
    let take_right = e.new_label();
    e.jump_if_falsy(rb, keep_left, take_right);
    emit_select(e, ra, rb, rhs, keep_left, take_right);
}

pub fn emit_or(e: &mut Emitter, ra: u32, rb: u32, rhs: Mem) {
    let keep_left = e.new_label();
    let take_right = e.new_label();
    e.jump_if_truthy(rb, keep_left, take_right);
    emit_select(e, ra, rb, rhs, keep_left, take_right);
}

fn emit_select(e: &mut Emitter, ra: u32, rb: u32, rhs: Mem, keep_left: Label, take_right: Label) {
    e.bind(take_right);
    let dst = e.reg(ra);
    e.copy_value(dst, rhs);

    if ra == rb {
        // Left operand is already in place.
        e.bind(keep_left);
        return;
    }

    let done = e.new_label();
    e.asm.jmp(done);
    e.bind(keep_left);
    let src = e.reg(rb);
    e.copy_value(dst, src);
    e.bind(done);
}
