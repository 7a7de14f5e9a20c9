//! Pinned machine context and VM state accessors.
//!
//! Native code keeps a handful of VM values in fixed places for its whole
//! lifetime. [`MachineContext`] names them; [`Emitter`] couples the
//! assembler with that context and offers the addressing and branching
//! helpers every instruction emitter builds on.
//!
//! Any call out of native code may move the VM value stack. [`Emitter::call`]
//! therefore returns a [`StaleBase`] token which must be handed back through
//! [`Emitter::reload_base`] or [`Emitter::restore_base_from_frame`] before the
//! frame base is used again.

use super::codebuf::{CodeBuffer, Label};
use super::labels::SharedLabels;
use super::x86_64::{Cond, Mem, Reg, X86_64Assembler, XMM0};
use crate::config::EmitConfig;
use crate::layout::{self, GC_BLACK_BIT, TVALUE_SIZE, frame, global, native, state, table, tags, tvalue};

/// Where the pinned VM values live while native code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineContext {
    /// VM thread handle (`*mut VmState`).
    pub state: Reg,
    /// Register window of the current frame.
    pub base: Reg,
    /// Runtime helper table (`*mut NativeContext`).
    pub native: Reg,
    /// Constant pool of the current function.
    pub constants: Reg,
    /// Current closure, spilled in the native frame.
    pub closure: Mem,
    /// Bytecode of the current function, spilled in the native frame.
    pub code: Mem,
}

impl MachineContext {
    /// System V AMD64 assignment.
    pub const SYSV: MachineContext = MachineContext {
        state: Reg::R15,
        base: Reg::R14,
        native: Reg::R13,
        constants: Reg::R12,
        closure: Mem::base(Reg::Rsp, 0),
        code: Mem::base(Reg::Rsp, 8),
    };

    /// Bytes reserved below the saved registers; keeps rsp 16-byte aligned.
    pub const FRAME_SIZE: i32 = 24;

    /// Integer argument registers in order.
    pub const ARGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

    /// Callee-saved registers pushed by the entry gate, in push order.
    pub const SAVED: [Reg; 6] = [Reg::Rbx, Reg::Rbp, Reg::R12, Reg::R13, Reg::R14, Reg::R15];
}

pub const ARG1: Reg = MachineContext::ARGS[0];
pub const ARG2: Reg = MachineContext::ARGS[1];
pub const ARG3: Reg = MachineContext::ARGS[2];
pub const ARG4: Reg = MachineContext::ARGS[3];
pub const ARG5: Reg = MachineContext::ARGS[4];
pub const ARG6: Reg = MachineContext::ARGS[5];

/// Proof that a call has just returned and the cached frame base is stale.
#[must_use = "the frame base must be reloaded after a call"]
#[derive(Debug)]
pub struct StaleBase(());

/// Assembler plus the pinned context and shared labels of one module.
pub struct Emitter<'a> {
    pub asm: X86_64Assembler<'a>,
    pub ctx: MachineContext,
    pub shared: SharedLabels,
    pub config: &'a EmitConfig,
}

impl<'a> Emitter<'a> {
    pub fn new(buf: &'a mut CodeBuffer, shared: SharedLabels, config: &'a EmitConfig) -> Self {
        Self {
            asm: X86_64Assembler::new(buf),
            ctx: MachineContext::SYSV,
            shared,
            config,
        }
    }

    pub fn new_label(&mut self) -> Label {
        self.asm.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.asm.bind(label);
    }

    // ==================== Addressing ====================

    /// Virtual register `r` of the current frame.
    pub fn reg(&self, r: u32) -> Mem {
        Mem::base(self.ctx.base, r as i32 * TVALUE_SIZE)
    }

    pub fn reg_tag(&self, r: u32) -> Mem {
        self.reg(r).offset(tvalue::TT)
    }

    /// Constant `k` of the current function.
    pub fn constant(&self, k: u32) -> Mem {
        Mem::base(self.ctx.constants, k as i32 * TVALUE_SIZE)
    }

    pub fn constant_tag(&self, k: u32) -> Mem {
        self.constant(k).offset(tvalue::TT)
    }

    /// Field of the VM thread handle.
    pub fn state_field(&self, offset: i32) -> Mem {
        Mem::base(self.ctx.state, offset)
    }

    /// Slot of the runtime helper table.
    pub fn helper(&self, offset: i32) -> Mem {
        Mem::base(self.ctx.native, offset)
    }

    /// Copy one tagged value (16 bytes) through xmm0.
    pub fn copy_value(&mut self, dst: Mem, src: Mem) {
        self.asm.movups_xm(XMM0, src);
        self.asm.movups_mx(dst, XMM0);
    }

    pub fn set_tag(&mut self, dst: Mem, tag: i32) {
        self.asm.mov_m32i(dst.offset(tvalue::TT), tag);
    }

    /// `L->top = L->ci->top`
    pub fn restore_top_from_frame(&mut self) {
        self.asm.mov_rm(Reg::Rax, self.state_field(state::CI));
        self.asm.mov_rm(Reg::Rax, Mem::base(Reg::Rax, frame::TOP));
        self.asm.mov_mr(self.state_field(state::TOP), Reg::Rax);
    }

    // ==================== Tag checks ====================

    /// Branch to `label` when the tag at `tag` equals `expected`.
    pub fn jump_if_tag_is(&mut self, tag: Mem, expected: i32, label: Label) {
        self.asm.cmp_m32i(tag, expected);
        self.asm.jcc(Cond::E, label);
    }

    /// Branch to `label` when the tag at `tag` differs from `expected`.
    pub fn jump_if_tag_is_not(&mut self, tag: Mem, expected: i32, label: Label) {
        self.asm.cmp_m32i(tag, expected);
        self.asm.jcc(Cond::Ne, label);
    }

    /// Falsy (nil or false) values branch to `target`, truthy ones to
    /// `fallthrough`.
    pub fn jump_if_falsy(&mut self, r: u32, target: Label, fallthrough: Label) {
        self.jump_if_tag_is(self.reg_tag(r), tags::NIL, target);
        self.jump_if_tag_is_not(self.reg_tag(r), tags::BOOLEAN, fallthrough);
        self.asm.cmp_m32i(self.reg(r), 0);
        self.asm.jcc(Cond::E, target);
    }

    /// Truthy values branch to `target`, falsy ones to `fallthrough`.
    pub fn jump_if_truthy(&mut self, r: u32, target: Label, fallthrough: Label) {
        self.jump_if_tag_is(self.reg_tag(r), tags::NIL, fallthrough);
        self.jump_if_tag_is_not(self.reg_tag(r), tags::BOOLEAN, target);
        self.asm.cmp_m32i(self.reg(r), 0);
        self.asm.jcc(Cond::Ne, target);
    }

    // ==================== Calls ====================

    /// Call through a helper table slot or any other memory operand.
    pub fn call(&mut self, target: Mem) -> StaleBase {
        self.asm.call_m(target);
        StaleBase(())
    }

    /// Call the address held in `target`.
    pub fn call_reg(&mut self, target: Reg) -> StaleBase {
        self.asm.call_r(target);
        StaleBase(())
    }

    /// Another call while the base is still stale from the previous one.
    pub fn call_again(&mut self, stale: StaleBase, target: Mem) -> StaleBase {
        self.asm.call_m(target);
        stale
    }

    /// `base = L->base`
    pub fn reload_base(&mut self, _stale: StaleBase) {
        self.asm.mov_rm(self.ctx.base, self.state_field(state::BASE));
    }

    /// `L->base = base = frame->base`
    pub fn restore_base_from_frame(&mut self, _stale: StaleBase, frame_reg: Reg) {
        self.asm.mov_rm(self.ctx.base, Mem::base(frame_reg, frame::BASE));
        self.asm.mov_mr(self.state_field(state::BASE), self.ctx.base);
    }

    /// `L->ci->savedpc = code + pcpos`. Clobbers rax and rdx.
    pub fn set_saved_pc(&mut self, pcpos: usize) {
        self.asm.mov_rm(Reg::Rdx, self.ctx.code);
        self.asm.add_ri(Reg::Rdx, (pcpos * crate::bytecode::INSN_SIZE) as i32);
        self.asm.mov_rm(Reg::Rax, self.state_field(state::CI));
        self.asm.mov_mr(Mem::base(Reg::Rax, frame::SAVEDPC), Reg::Rdx);
    }

    /// Run the interrupt callback, if one is installed, before `pcpos`.
    ///
    /// A callback that leaves the thread with a non-zero status rewinds
    /// savedpc onto the instruction and leaves native code.
    pub fn interrupt(&mut self, pcpos: usize) {
        if !self.config.interrupts {
            return;
        }

        let skip = self.new_label();
        self.asm.mov_rm(Reg::R8, self.state_field(state::GLOBAL));
        self.asm.mov_rm(Reg::R8, Mem::base(Reg::R8, global::INTERRUPT));
        self.asm.test_rr(Reg::R8, Reg::R8);
        self.asm.jcc(Cond::E, skip);

        self.set_saved_pc(pcpos + 1);
        self.asm.mov_rr(ARG1, self.ctx.state);
        self.asm.mov_r32i(ARG2, u32::MAX);
        let stale = self.call_reg(Reg::R8);
        self.reload_base(stale);

        self.asm.movzx_r32m8(Reg::Rax, self.state_field(state::STATUS));
        self.asm.test_rr32(Reg::Rax, Reg::Rax);
        self.asm.jcc(Cond::E, skip);

        self.asm.mov_rm(Reg::Rax, self.state_field(state::CI));
        self.asm.mov_rm(Reg::Rdx, Mem::base(Reg::Rax, frame::SAVEDPC));
        self.asm.sub_ri(Reg::Rdx, crate::bytecode::INSN_SIZE as i32);
        self.asm.mov_mr(Mem::base(Reg::Rax, frame::SAVEDPC), Reg::Rdx);
        self.asm.jmp(self.shared.exit_no_continue_vm);

        self.bind(skip);
    }

    /// Backward write barrier after storing into `table_reg`'s array part.
    ///
    /// Only black tables need the barrier; the check runs on every store.
    pub fn barrier_table_back(&mut self, table_reg: Reg) {
        let skip = self.new_label();
        self.asm.test_m8i(Mem::base(table_reg, table::MARKED), 1 << GC_BLACK_BIT);
        self.asm.jcc(Cond::E, skip);

        self.asm.mov_rr(ARG1, self.ctx.state);
        self.asm.mov_rr(ARG2, table_reg);
        self.asm.lea(ARG3, Mem::base(table_reg, table::GCLIST));
        let stale = self.call(self.helper(native::BARRIER_BACK));
        self.reload_base(stale);

        self.bind(skip);
    }

    /// Leave native code; the interpreter resumes at the current savedpc.
    pub fn exit_to_vm(&mut self) {
        self.asm.jmp(self.shared.exit_continue_vm);
    }
}

/// Address of the tag-method name for `event`, relative to the global state.
pub fn tm_name_offset(event: i32) -> i32 {
    global::TMNAME + event * std::mem::size_of::<*mut layout::TString>() as i32
}
