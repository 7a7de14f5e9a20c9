//! Loads and register moves.

use crate::jit::context::Emitter;
use crate::jit::x86_64::Reg;
use crate::layout::tags;

pub fn emit_load_nil(e: &mut Emitter, ra: u32) {
    let dst = e.reg(ra);
    e.set_tag(dst, tags::NIL);
}

pub fn emit_load_b(e: &mut Emitter, ra: u32, value: u32) {
    let dst = e.reg(ra);
    e.asm.mov_m64i(dst, value as i32);
    e.set_tag(dst, tags::BOOLEAN);
}

pub fn emit_load_n(e: &mut Emitter, ra: u32, value: i32) {
    let dst = e.reg(ra);
    e.asm.mov_ri64(Reg::Rax, (value as f64).to_bits() as i64);
    e.asm.mov_mr(dst, Reg::Rax);
    e.set_tag(dst, tags::NUMBER);
}

pub fn emit_load_k(e: &mut Emitter, ra: u32, k: u32) {
    let (dst, src) = (e.reg(ra), e.constant(k));
    e.copy_value(dst, src);
}

pub fn emit_move(e: &mut Emitter, ra: u32, rb: u32) {
    let (dst, src) = (e.reg(ra), e.reg(rb));
    e.copy_value(dst, src);
}
