//! COVERAGE: saturating hit counter kept in the instruction's E field.

use crate::bytecode::{COVERAGE_MAX, INSN_SIZE};
use crate::jit::context::Emitter;
use crate::jit::x86_64::{Cond, Mem, Reg};

pub fn emit_coverage(e: &mut Emitter, pcpos: usize) {
    let code = e.ctx.code;
    let insn = Reg::Rcx;
    let hits = Reg::Rdx;

    e.asm.mov_rm(insn, code);
    e.asm.add_ri(insn, (pcpos * INSN_SIZE) as i32);

    e.asm.mov_r32m(hits, Mem::base(insn, 0));
    e.asm.sar_r32i(hits, 8);

    // hits += (hits != COVERAGE_MAX)
    e.asm.xor_rr32(Reg::Rax, Reg::Rax);
    e.asm.cmp_r32i(hits, COVERAGE_MAX);
    e.asm.setcc(Cond::Ne, Reg::Rax);
    e.asm.add_rr32(hits, Reg::Rax);

    // Put the counter back above the opcode byte
    e.asm.shl_r32i(hits, 8);
    e.asm.movzx_r32m8(Reg::Rax, Mem::base(insn, 0));
    e.asm.or_rr32(Reg::Rax, hits);
    e.asm.mov_m32r(Mem::base(insn, 0), Reg::Rax);
}
