//! NAMECALL: method lookup `R(A+1) = R(B); R(A) = R(B)[K(aux)]`.
//!
//! Handles a table receiver whose key sits in its main hash position, or a
//! receiver whose `__index` is a table holding the key at the instruction's
//! cached slot. Everything else goes to `fallback`.

use crate::jit::codebuf::Label;
use crate::jit::context::{ARG1, ARG2, ARG3, Emitter, tm_name_offset};
use crate::jit::x86_64::{Cond, Mem, Reg};
use crate::layout::{
    LUA_NODE_SIZE_LOG2, TKEY_NEXT_SHIFT, TKEY_TAG_MASK, native, node, state, table, tags, tm,
    tstring, tvalue,
};

/// Byte offset of the C operand inside an instruction word.
const INSN_C_OFFSET: i32 = 3;

pub fn emit_name_call(e: &mut Emitter, pcpos: usize, ra: u32, rb: u32, aux: u32, fallback: Label) {
    let via_index = e.new_label();
    let done = e.new_label();

    e.jump_if_tag_is_not(e.reg_tag(rb), tags::TABLE, fallback);

    let table_reg = Reg::R8;
    let node_reg = Reg::Rdx;
    e.asm.mov_rm(table_reg, e.reg(rb));

    // node = &t->node[key->hash & (sizenode(t) - 1)]
    e.asm.mov_rm(node_reg, Mem::base(table_reg, table::NODE));
    e.asm.mov_r32i(Reg::Rax, 1);
    e.asm.movzx_r32m8(Reg::Rcx, Mem::base(table_reg, table::LSIZENODE));
    e.asm.shl_r32cl(Reg::Rax);
    e.asm.dec32(Reg::Rax);
    e.asm.mov_rm(Reg::Rcx, e.constant(aux));
    e.asm.mov_r32m(Reg::Rcx, Mem::base(Reg::Rcx, tstring::HASH));
    e.asm.and_rr32(Reg::Rax, Reg::Rcx);
    e.asm.shl_ri(Reg::Rax, LUA_NODE_SIZE_LOG2);
    e.asm.add_rr(node_reg, Reg::Rax);

    jump_if_node_key_not(e, node_reg, aux, via_index);
    emit_result(e, ra, rb, node_reg);
    e.asm.jmp(done);

    e.bind(via_index);

    // A chained main position means the key may live elsewhere
    e.asm.mov_r32m(Reg::Rcx, Mem::base(node_reg, node::KEY_TT_NEXT));
    e.asm.sar_r32i(Reg::Rcx, TKEY_NEXT_SHIFT);
    e.asm.jcc(Cond::Ne, fallback);

    // handler = get_fast_tm(t->metatable, TM_INDEX, name)
    e.asm.mov_rm(ARG1, Mem::base(table_reg, table::METATABLE));
    e.asm.test_rr(ARG1, ARG1);
    e.asm.jcc(Cond::E, fallback);
    e.asm.test_m8i(Mem::base(ARG1, table::TMCACHE), 1 << tm::INDEX as u8);
    e.asm.jcc(Cond::Ne, fallback);
    e.asm.mov_r32i(ARG2, tm::INDEX as u32);
    e.asm.mov_rm(Reg::Rax, e.state_field(state::GLOBAL));
    e.asm.mov_rm(ARG3, Mem::base(Reg::Rax, tm_name_offset(tm::INDEX)));
    let stale = e.call(e.helper(native::GET_FAST_TM));
    e.reload_base(stale);

    e.asm.test_rr(Reg::Rax, Reg::Rax);
    e.asm.jcc(Cond::E, fallback);
    e.jump_if_tag_is_not(Mem::base(Reg::Rax, tvalue::TT), tags::TABLE, fallback);
    e.asm.mov_rm(table_reg, Mem::base(Reg::Rax, tvalue::VALUE));

    // node = &t->node[C & nodemask8]
    let code = e.ctx.code;
    e.asm.mov_rm(node_reg, code);
    e.asm.movzx_r32m8(
        Reg::Rax,
        Mem::base(node_reg, (pcpos * crate::bytecode::INSN_SIZE) as i32 + INSN_C_OFFSET),
    );
    e.asm.movzx_r32m8(Reg::Rcx, Mem::base(table_reg, table::NODEMASK8));
    e.asm.and_rr32(Reg::Rax, Reg::Rcx);
    e.asm.shl_ri(Reg::Rax, LUA_NODE_SIZE_LOG2);
    e.asm.mov_rm(node_reg, Mem::base(table_reg, table::NODE));
    e.asm.add_rr(node_reg, Reg::Rax);

    jump_if_node_key_not(e, node_reg, aux, fallback);
    emit_result(e, ra, rb, node_reg);

    e.bind(done);
}

/// Branch to `label` unless `node` holds string key `K(aux)` with a non-nil value.
fn jump_if_node_key_not(e: &mut Emitter, node_reg: Reg, aux: u32, label: Label) {
    e.asm.mov_r32m(Reg::Rax, Mem::base(node_reg, node::KEY_TT_NEXT));
    e.asm.and_r32i(Reg::Rax, TKEY_TAG_MASK);
    e.asm.cmp_r32i(Reg::Rax, tags::STRING);
    e.asm.jcc(Cond::Ne, label);

    e.asm.mov_rm(Reg::Rax, e.constant(aux));
    e.asm.cmp_rm(Reg::Rax, Mem::base(node_reg, node::KEY_VALUE));
    e.asm.jcc(Cond::Ne, label);

    e.jump_if_tag_is(Mem::base(node_reg, node::VAL + tvalue::TT), tags::NIL, label);
}

fn emit_result(e: &mut Emitter, ra: u32, rb: u32, node_reg: Reg) {
    e.copy_value(e.reg(ra + 1), e.reg(rb));
    e.copy_value(e.reg(ra), Mem::base(node_reg, node::VAL));
}
