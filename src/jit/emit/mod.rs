//! Per-instruction emitters and the dispatch from opcode to emitter.

mod basic;
mod builtins;
mod call;
mod coverage;
mod fastcall;
mod forg;
mod import;
mod logic;
mod namecall;
mod setlist;

use super::EmitError;
use super::codebuf::Label;
use super::context::Emitter;
use super::labels::Outcome;
use crate::bytecode::{Insn, Opcode};

/// One decoded instruction together with the labels of its function.
pub struct InstSite<'a> {
    pub pc: usize,
    pub op: Opcode,
    pub insn: Insn,
    /// Whole instruction stream of the function.
    pub code: &'a [u32],
    /// One label per instruction word, plus one past the end.
    pub labels: &'a [Label],
}

impl InstSite<'_> {
    /// Label of the instruction following this one.
    pub fn next(&self) -> Label {
        self.labels[self.pc + self.op.words()]
    }

    /// Label of the instruction at `target`, which must lie inside the function.
    pub fn label_at(&self, target: i64) -> Result<Label, EmitError> {
        if target < 0 || target >= self.code.len() as i64 {
            return Err(EmitError::InvalidJumpTarget {
                pc: self.pc,
                target,
            });
        }
        Ok(self.labels[target as usize])
    }

    /// Target of a D-relative jump: `pc + 1 + D`.
    pub fn jump_target(&self) -> Result<Label, EmitError> {
        self.label_at(self.pc as i64 + 1 + self.insn.d() as i64)
    }
}

/// Out-of-line code emitted after the function body.
#[derive(Debug, Clone, Copy)]
pub enum Fallback {
    /// Hand the instruction at `pc` back to the interpreter.
    Reenter { label: Label, pc: usize },
    /// Generic-for step over a value that is not a plain table.
    ForGLoop {
        label: Label,
        pc: usize,
        ra: u32,
        aux: u32,
        repeat: Label,
        exit: Label,
    },
}

/// Emit the native sequence for one instruction.
pub fn emit_instruction(
    e: &mut Emitter,
    site: &InstSite,
    fallbacks: &mut Vec<Fallback>,
) -> Result<Outcome, EmitError> {
    let insn = site.insn;
    let (a, b, c) = (insn.a() as u32, insn.b() as u32, insn.c() as u32);

    let outcome = match site.op {
        Opcode::Nop => Outcome::Next,
        Opcode::LoadNil => {
            basic::emit_load_nil(e, a);
            Outcome::Next
        }
        Opcode::LoadB => {
            basic::emit_load_b(e, a, b);
            if c != 0 {
                Outcome::JumpTo(site.label_at(site.pc as i64 + 1 + c as i64)?)
            } else {
                Outcome::Next
            }
        }
        Opcode::LoadN => {
            basic::emit_load_n(e, a, insn.d());
            Outcome::Next
        }
        Opcode::LoadK => {
            basic::emit_load_k(e, a, insn.d() as u16 as u32);
            Outcome::Next
        }
        Opcode::LoadKX => {
            basic::emit_load_k(e, a, insn.aux());
            Outcome::Next
        }
        Opcode::Move => {
            basic::emit_move(e, a, b);
            Outcome::Next
        }
        Opcode::Jump => Outcome::JumpTo(site.jump_target()?),
        Opcode::JumpBack => {
            e.interrupt(site.pc);
            Outcome::JumpTo(site.jump_target()?)
        }
        Opcode::GetImport => {
            import::emit_get_import(e, site.pc, a, insn.d() as u16 as u32, insn.aux());
            Outcome::Next
        }
        Opcode::NameCall => {
            let label = e.new_label();
            fallbacks.push(Fallback::Reenter { label, pc: site.pc });
            namecall::emit_name_call(e, site.pc, a, b, insn.aux(), label);
            Outcome::Next
        }
        Opcode::Call => {
            call::emit_call(e, site.pc, a, insn.b(), insn.c());
            Outcome::Next
        }
        Opcode::Return => {
            call::emit_return(e, site.pc, a, insn.b());
            Outcome::Leave
        }
        Opcode::And => {
            let rhs = e.reg(c);
            logic::emit_and(e, a, b, rhs);
            Outcome::Next
        }
        Opcode::AndK => {
            let rhs = e.constant(c);
            logic::emit_and(e, a, b, rhs);
            Outcome::Next
        }
        Opcode::Or => {
            let rhs = e.reg(c);
            logic::emit_or(e, a, b, rhs);
            Outcome::Next
        }
        Opcode::OrK => {
            let rhs = e.constant(c);
            logic::emit_or(e, a, b, rhs);
            Outcome::Next
        }
        Opcode::SetList => {
            setlist::emit_set_list(e, site.pc, a, b, insn.c(), insn.aux())?;
            Outcome::Next
        }
        Opcode::ForGLoop => {
            let repeat = site.jump_target()?;
            let exit = site.next();
            let label = e.new_label();
            fallbacks.push(Fallback::ForGLoop {
                label,
                pc: site.pc,
                ra: a,
                aux: insn.aux(),
                repeat,
                exit,
            });
            forg::emit_forg_loop(e, site.pc, a, insn.aux(), repeat, exit, label);
            Outcome::Next
        }
        Opcode::ForGPrep | Opcode::ForGPrepNext | Opcode::ForGPrepInext => {
            let target = site.jump_target()?;
            forg::emit_forg_prep(e, site.pc, a);
            Outcome::JumpTo(target)
        }
        Opcode::FastCall | Opcode::FastCall1 | Opcode::FastCall2 | Opcode::FastCall2K => {
            fastcall::emit_fast_call(e, site)?
        }
        Opcode::Coverage => {
            coverage::emit_coverage(e, site.pc);
            Outcome::Next
        }
        opcode => {
            return Err(EmitError::UnsupportedInstruction {
                pc: site.pc,
                opcode,
            });
        }
    };
    Ok(outcome)
}

/// Emit one out-of-line fallback block.
pub fn emit_fallback(e: &mut Emitter, fallback: Fallback) {
    match fallback {
        Fallback::Reenter { label, pc } => {
            e.bind(label);
            e.set_saved_pc(pc);
            e.exit_to_vm();
        }
        Fallback::ForGLoop {
            label,
            pc,
            ra,
            aux,
            repeat,
            exit,
        } => {
            e.bind(label);
            forg::emit_forg_loop_fallback(e, pc, ra, aux, repeat);
            e.asm.jmp(exit);
        }
    }
}
