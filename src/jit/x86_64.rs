//! x86-64 instruction encoding for JIT compilation.
//!
//! This module provides functions for encoding x86-64 instructions
//! as machine code bytes. Uses System V AMD64 ABI conventions.
//!
//! Memory operands are described by [`Mem`] (base + optional scaled index +
//! displacement); all ModR/M and SIB special cases (RSP/R12 bases need a SIB
//! byte, RBP/R13 bases cannot use the no-displacement form) are handled in
//! one place.

use super::codebuf::{CodeBuffer, Label};

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    // Caller-saved (scratch) registers
    Rax = 0,  // Return value
    Rcx = 1,  // 4th argument
    Rdx = 2,  // 3rd argument
    Rbx = 3,  // Callee-saved
    Rsp = 4,  // Stack pointer
    Rbp = 5,  // Frame pointer (callee-saved)
    Rsi = 6,  // 2nd argument
    Rdi = 7,  // 1st argument
    R8 = 8,   // 5th argument
    R9 = 9,   // 6th argument
    R10 = 10, // Caller-saved
    R11 = 11, // Caller-saved
    R12 = 12, // Callee-saved
    R13 = 13, // Callee-saved
    R14 = 14, // Callee-saved
    R15 = 15, // Callee-saved
}

impl Reg {
    /// Get the register code (lower 3 bits).
    pub fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Check if this register requires a REX extension bit.
    pub fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }
}

/// SSE register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xmm(pub u8);

pub const XMM0: Xmm = Xmm(0);
pub const XMM1: Xmm = Xmm(1);
pub const XMM2: Xmm = Xmm(2);

/// x86-64 condition codes (for Jcc, SETcc, CMOVcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    O = 0x0,  // Overflow
    No = 0x1, // Not overflow
    B = 0x2,  // Below (unsigned <)
    Ae = 0x3, // Above or equal (unsigned >=)
    E = 0x4,  // Equal / zero
    Ne = 0x5, // Not equal / not zero
    Be = 0x6, // Below or equal (unsigned <=)
    A = 0x7,  // Above (unsigned >)
    S = 0x8,  // Sign (negative)
    Ns = 0x9, // Not sign (non-negative)
    P = 0xA,  // Parity even
    Np = 0xB, // Parity odd
    L = 0xC,  // Less (signed <)
    Ge = 0xD, // Greater or equal (signed >=)
    Le = 0xE, // Less or equal (signed <=)
    G = 0xF,  // Greater (signed >)
}

impl Cond {
    /// Invert the condition.
    pub fn invert(self) -> Self {
        // Condition codes come in complementary pairs differing in bit 0.
        match (self as u8) ^ 1 {
            0x0 => Cond::O,
            0x1 => Cond::No,
            0x2 => Cond::B,
            0x3 => Cond::Ae,
            0x4 => Cond::E,
            0x5 => Cond::Ne,
            0x6 => Cond::Be,
            0x7 => Cond::A,
            0x8 => Cond::S,
            0x9 => Cond::Ns,
            0xA => Cond::P,
            0xB => Cond::Np,
            0xC => Cond::L,
            0xD => Cond::Ge,
            0xE => Cond::Le,
            _ => Cond::G,
        }
    }
}

/// Index scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Scale {
    X1 = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
}

/// Memory operand `[base + index * scale + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: Reg,
    pub index: Option<(Reg, Scale)>,
    pub disp: i32,
}

impl Mem {
    pub const fn base(base: Reg, disp: i32) -> Self {
        Mem {
            base,
            index: None,
            disp,
        }
    }

    pub const fn indexed(base: Reg, index: Reg, scale: Scale, disp: i32) -> Self {
        Mem {
            base,
            index: Some((index, scale)),
            disp,
        }
    }

    /// The same operand shifted by `delta` bytes.
    pub const fn offset(self, delta: i32) -> Self {
        Mem {
            disp: self.disp + delta,
            ..self
        }
    }
}

/// x86-64 assembler.
pub struct X86_64Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X86_64Assembler<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    pub fn new_label(&mut self) -> Label {
        self.buf.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.buf.bind(label);
    }

    /// Current code offset.
    pub fn offset(&self) -> usize {
        self.buf.len()
    }

    /// Pad with `int3` to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        self.buf.align(alignment);
    }

    // ==================== Encoding helpers ====================

    /// Emit a REX prefix if any bit is needed (or `force` for byte registers).
    fn rex(&mut self, w: bool, reg: u8, index: u8, base: u8, force: bool) {
        let rex = 0x40
            | ((w as u8) << 3)
            | (((reg >> 3) & 1) << 2)
            | (((index >> 3) & 1) << 1)
            | ((base >> 3) & 1);
        if rex != 0x40 || force {
            self.buf.emit_u8(rex);
        }
    }

    /// Encode ModR/M byte.
    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// Emit ModR/M (+ SIB, + displacement) for a memory operand.
    fn emit_mem(&mut self, reg: u8, mem: Mem) {
        let base = mem.base as u8;
        let (mode, disp_len) = if mem.disp == 0 && base & 7 != 5 {
            (0b00, 0)
        } else if (-128..=127).contains(&mem.disp) {
            (0b01, 1)
        } else {
            (0b10, 4)
        };

        match mem.index {
            None if base & 7 != 4 => {
                self.buf.emit_u8(Self::modrm(mode, reg, base));
            }
            None => {
                // RSP/R12 base: SIB with no index
                self.buf.emit_u8(Self::modrm(mode, reg, 0b100));
                self.buf.emit_u8(0x24);
            }
            Some((index, scale)) => {
                debug_assert!(index != Reg::Rsp, "rsp cannot be an index");
                self.buf.emit_u8(Self::modrm(mode, reg, 0b100));
                let sib = ((scale as u8) << 6) | (index.code() << 3) | (base & 7);
                self.buf.emit_u8(sib);
            }
        }

        match disp_len {
            0 => {}
            1 => self.buf.emit_u8(mem.disp as i8 as u8),
            _ => self.buf.emit_u32(mem.disp as u32),
        }
    }

    /// `[prefix] REX opcode modrm(mem)`
    fn op_mem(&mut self, prefix: Option<u8>, w: bool, opcode: &[u8], reg: u8, mem: Mem) {
        if let Some(p) = prefix {
            self.buf.emit_u8(p);
        }
        let index = mem.index.map_or(0, |(r, _)| r as u8);
        self.rex(w, reg, index, mem.base as u8, false);
        for &b in opcode {
            self.buf.emit_u8(b);
        }
        self.emit_mem(reg, mem);
    }

    /// `[prefix] REX opcode modrm(11, reg, rm)`
    fn op_reg(&mut self, prefix: Option<u8>, w: bool, opcode: &[u8], reg: u8, rm: u8, force_rex: bool) {
        if let Some(p) = prefix {
            self.buf.emit_u8(p);
        }
        self.rex(w, reg, 0, rm, force_rex);
        for &b in opcode {
            self.buf.emit_u8(b);
        }
        self.buf.emit_u8(Self::modrm(0b11, reg, rm));
    }

    /// Group-1 ALU op with an immediate (`/ext`), short form when it fits.
    fn alu_ri(&mut self, w: bool, ext: u8, dst: Reg, imm: i32) {
        if (-128..=127).contains(&imm) {
            self.op_reg(None, w, &[0x83], ext, dst as u8, false);
            self.buf.emit_u8(imm as i8 as u8);
        } else {
            self.op_reg(None, w, &[0x81], ext, dst as u8, false);
            self.buf.emit_u32(imm as u32);
        }
    }

    fn shift_ri(&mut self, w: bool, ext: u8, dst: Reg, imm: u8) {
        self.op_reg(None, w, &[0xC1], ext, dst as u8, false);
        self.buf.emit_u8(imm);
    }

    // ==================== Data Movement ====================

    /// MOV r64, r64
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, true, &[0x89], src as u8, dst as u8, false);
    }

    /// MOV r32, r32 (zero-extends into the full register)
    pub fn mov_rr32(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, false, &[0x89], src as u8, dst as u8, false);
    }

    /// MOV r64, imm64
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.rex(true, 0, 0, dst as u8, false);
        self.buf.emit_u8(0xB8 + dst.code());
        self.buf.emit_u64(imm as u64);
    }

    /// MOV r32, imm32 (zero-extends into the full register)
    pub fn mov_r32i(&mut self, dst: Reg, imm: u32) {
        self.rex(false, 0, 0, dst as u8, false);
        self.buf.emit_u8(0xB8 + dst.code());
        self.buf.emit_u32(imm);
    }

    /// MOV r64, [mem]
    pub fn mov_rm(&mut self, dst: Reg, mem: Mem) {
        self.op_mem(None, true, &[0x8B], dst as u8, mem);
    }

    /// MOV [mem], r64
    pub fn mov_mr(&mut self, mem: Mem, src: Reg) {
        self.op_mem(None, true, &[0x89], src as u8, mem);
    }

    /// MOV r32, dword [mem]
    pub fn mov_r32m(&mut self, dst: Reg, mem: Mem) {
        self.op_mem(None, false, &[0x8B], dst as u8, mem);
    }

    /// MOV dword [mem], r32
    pub fn mov_m32r(&mut self, mem: Mem, src: Reg) {
        self.op_mem(None, false, &[0x89], src as u8, mem);
    }

    /// MOV dword [mem], imm32
    pub fn mov_m32i(&mut self, mem: Mem, imm: i32) {
        self.op_mem(None, false, &[0xC7], 0, mem);
        self.buf.emit_u32(imm as u32);
    }

    /// MOV qword [mem], imm32 (sign-extended)
    pub fn mov_m64i(&mut self, mem: Mem, imm: i32) {
        self.op_mem(None, true, &[0xC7], 0, mem);
        self.buf.emit_u32(imm as u32);
    }

    /// MOVZX r32, byte [mem]
    pub fn movzx_r32m8(&mut self, dst: Reg, mem: Mem) {
        self.op_mem(None, false, &[0x0F, 0xB6], dst as u8, mem);
    }

    /// MOVZX r32, r8
    pub fn movzx_r32r8(&mut self, dst: Reg, src: Reg) {
        let force = (4..8).contains(&(src as u8));
        self.op_reg(None, false, &[0x0F, 0xB6], dst as u8, src as u8, force);
    }

    /// LEA r64, [mem]
    pub fn lea(&mut self, dst: Reg, mem: Mem) {
        self.op_mem(None, true, &[0x8D], dst as u8, mem);
    }

    // ==================== Arithmetic Operations ====================

    /// ADD r64, r64
    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, true, &[0x01], src as u8, dst as u8, false);
    }

    /// ADD r32, r32
    pub fn add_rr32(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, false, &[0x01], src as u8, dst as u8, false);
    }

    /// ADD r64, imm32 (sign-extended)
    pub fn add_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(true, 0, dst, imm);
    }

    /// ADD r32, imm32
    pub fn add_r32i(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(false, 0, dst, imm);
    }

    /// ADD r64, [mem]
    pub fn add_rm(&mut self, dst: Reg, mem: Mem) {
        self.op_mem(None, true, &[0x03], dst as u8, mem);
    }

    /// SUB r64, r64
    pub fn sub_rr(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, true, &[0x29], src as u8, dst as u8, false);
    }

    /// SUB r64, imm32 (sign-extended)
    pub fn sub_ri(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(true, 5, dst, imm);
    }

    /// AND r32, r32
    pub fn and_rr32(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, false, &[0x21], src as u8, dst as u8, false);
    }

    /// AND r32, imm32
    pub fn and_r32i(&mut self, dst: Reg, imm: i32) {
        self.alu_ri(false, 4, dst, imm);
    }

    /// OR r32, r32
    pub fn or_rr32(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, false, &[0x09], src as u8, dst as u8, false);
    }

    /// XOR r32, r32 (also clears the upper half)
    pub fn xor_rr32(&mut self, dst: Reg, src: Reg) {
        self.op_reg(None, false, &[0x31], src as u8, dst as u8, false);
    }

    /// INC r64
    pub fn inc(&mut self, dst: Reg) {
        self.op_reg(None, true, &[0xFF], 0, dst as u8, false);
    }

    /// INC r32
    pub fn inc32(&mut self, dst: Reg) {
        self.op_reg(None, false, &[0xFF], 0, dst as u8, false);
    }

    /// DEC r32
    pub fn dec32(&mut self, dst: Reg) {
        self.op_reg(None, false, &[0xFF], 1, dst as u8, false);
    }

    // ==================== Shifts ====================

    /// SHL r64, imm8
    pub fn shl_ri(&mut self, dst: Reg, imm: u8) {
        self.shift_ri(true, 4, dst, imm);
    }

    /// SHR r64, imm8
    pub fn shr_ri(&mut self, dst: Reg, imm: u8) {
        self.shift_ri(true, 5, dst, imm);
    }

    /// SHL r32, imm8
    pub fn shl_r32i(&mut self, dst: Reg, imm: u8) {
        self.shift_ri(false, 4, dst, imm);
    }

    /// SHR r32, imm8
    pub fn shr_r32i(&mut self, dst: Reg, imm: u8) {
        self.shift_ri(false, 5, dst, imm);
    }

    /// SAR r32, imm8
    pub fn sar_r32i(&mut self, dst: Reg, imm: u8) {
        self.shift_ri(false, 7, dst, imm);
    }

    /// SHL r32, CL
    pub fn shl_r32cl(&mut self, dst: Reg) {
        self.op_reg(None, false, &[0xD3], 4, dst as u8, false);
    }

    // ==================== Comparison ====================

    /// CMP r64, r64
    pub fn cmp_rr(&mut self, a: Reg, b: Reg) {
        self.op_reg(None, true, &[0x39], b as u8, a as u8, false);
    }

    /// CMP r64, qword [mem]
    pub fn cmp_rm(&mut self, a: Reg, mem: Mem) {
        self.op_mem(None, true, &[0x3B], a as u8, mem);
    }

    /// CMP r64, imm32 (sign-extended)
    pub fn cmp_ri(&mut self, a: Reg, imm: i32) {
        self.alu_ri(true, 7, a, imm);
    }

    /// CMP r32, imm32
    pub fn cmp_r32i(&mut self, a: Reg, imm: i32) {
        self.alu_ri(false, 7, a, imm);
    }

    /// CMP r32, dword [mem]
    pub fn cmp_r32m(&mut self, a: Reg, mem: Mem) {
        self.op_mem(None, false, &[0x3B], a as u8, mem);
    }

    /// CMP dword [mem], r32
    pub fn cmp_m32r(&mut self, mem: Mem, b: Reg) {
        self.op_mem(None, false, &[0x39], b as u8, mem);
    }

    /// CMP dword [mem], imm32
    pub fn cmp_m32i(&mut self, mem: Mem, imm: i32) {
        if (-128..=127).contains(&imm) {
            self.op_mem(None, false, &[0x83], 7, mem);
            self.buf.emit_u8(imm as i8 as u8);
        } else {
            self.op_mem(None, false, &[0x81], 7, mem);
            self.buf.emit_u32(imm as u32);
        }
    }

    /// TEST r64, r64
    pub fn test_rr(&mut self, a: Reg, b: Reg) {
        self.op_reg(None, true, &[0x85], b as u8, a as u8, false);
    }

    /// TEST r32, r32
    pub fn test_rr32(&mut self, a: Reg, b: Reg) {
        self.op_reg(None, false, &[0x85], b as u8, a as u8, false);
    }

    /// TEST r8, r8
    pub fn test_rr8(&mut self, a: Reg, b: Reg) {
        let force = (4..8).contains(&(a as u8)) || (4..8).contains(&(b as u8));
        self.op_reg(None, false, &[0x84], b as u8, a as u8, force);
    }

    /// TEST byte [mem], imm8
    pub fn test_m8i(&mut self, mem: Mem, imm: u8) {
        self.op_mem(None, false, &[0xF6], 0, mem);
        self.buf.emit_u8(imm);
    }

    /// SETcc r8
    pub fn setcc(&mut self, cond: Cond, dst: Reg) {
        let force = (4..8).contains(&(dst as u8));
        self.op_reg(None, false, &[0x0F, 0x90 | cond as u8], 0, dst as u8, force);
    }

    // ==================== SSE ====================

    /// MOVUPS xmm, [mem] (16-byte load)
    pub fn movups_xm(&mut self, dst: Xmm, mem: Mem) {
        self.op_mem(None, false, &[0x0F, 0x10], dst.0, mem);
    }

    /// MOVUPS [mem], xmm (16-byte store)
    pub fn movups_mx(&mut self, mem: Mem, src: Xmm) {
        self.op_mem(None, false, &[0x0F, 0x11], src.0, mem);
    }

    /// MOVSD xmm, qword [mem]
    pub fn movsd_xm(&mut self, dst: Xmm, mem: Mem) {
        self.op_mem(Some(0xF2), false, &[0x0F, 0x10], dst.0, mem);
    }

    /// MOVSD qword [mem], xmm
    pub fn movsd_mx(&mut self, mem: Mem, src: Xmm) {
        self.op_mem(Some(0xF2), false, &[0x0F, 0x11], src.0, mem);
    }

    /// CVTSI2SD xmm, r32
    pub fn cvtsi2sd_r32(&mut self, dst: Xmm, src: Reg) {
        self.op_reg(Some(0xF2), false, &[0x0F, 0x2A], dst.0, src as u8, false);
    }

    /// SQRTSD xmm, qword [mem]
    pub fn sqrtsd_xm(&mut self, dst: Xmm, mem: Mem) {
        self.op_mem(Some(0xF2), false, &[0x0F, 0x51], dst.0, mem);
    }

    /// ROUNDSD xmm, xmm, imm8 (SSE4.1)
    pub fn roundsd(&mut self, dst: Xmm, src: Xmm, mode: u8) {
        self.op_reg(Some(0x66), false, &[0x0F, 0x3A, 0x0B], dst.0, src.0, false);
        self.buf.emit_u8(mode);
    }

    // ==================== Stack Operations ====================

    /// PUSH r64
    pub fn push(&mut self, reg: Reg) {
        self.rex(false, 0, 0, reg as u8, false);
        self.buf.emit_u8(0x50 + reg.code());
    }

    /// POP r64
    pub fn pop(&mut self, reg: Reg) {
        self.rex(false, 0, 0, reg as u8, false);
        self.buf.emit_u8(0x58 + reg.code());
    }

    // ==================== Control Flow ====================

    /// JMP rel32 to a label
    pub fn jmp(&mut self, target: Label) {
        self.buf.emit_u8(0xE9);
        self.buf.emit_label_ref(target);
    }

    /// Jcc rel32 to a label
    pub fn jcc(&mut self, cond: Cond, target: Label) {
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x80 | cond as u8);
        self.buf.emit_label_ref(target);
    }

    /// JMP qword [mem]
    pub fn jmp_m(&mut self, mem: Mem) {
        self.op_mem(None, false, &[0xFF], 4, mem);
    }

    /// JMP r64
    pub fn jmp_r(&mut self, reg: Reg) {
        self.op_reg(None, false, &[0xFF], 4, reg as u8, false);
    }

    /// CALL qword [mem]
    pub fn call_m(&mut self, mem: Mem) {
        self.op_mem(None, false, &[0xFF], 2, mem);
    }

    /// CALL r64
    pub fn call_r(&mut self, reg: Reg) {
        self.op_reg(None, false, &[0xFF], 2, reg as u8, false);
    }

    /// RET
    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }

    /// INT3
    pub fn int3(&mut self) {
        self.buf.emit_u8(0xCC);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(f: impl FnOnce(&mut X86_64Assembler)) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        let mut asm = X86_64Assembler::new(&mut buf);
        f(&mut asm);
        buf.resolve().unwrap();
        buf.into_code()
    }

    #[test]
    fn test_mov_rr() {
        // MOV RAX, RBX = 48 89 D8
        assert_eq!(assemble(|a| a.mov_rr(Reg::Rax, Reg::Rbx)), [0x48, 0x89, 0xD8]);
        // MOV R15, RDI = 49 89 FF
        assert_eq!(assemble(|a| a.mov_rr(Reg::R15, Reg::Rdi)), [0x49, 0x89, 0xFF]);
    }

    #[test]
    fn test_mov_ri64() {
        let code = assemble(|a| a.mov_ri64(Reg::Rax, 0x123456789ABCDEF0));
        // MOV RAX, imm64 = 48 B8 <imm64>
        assert_eq!(code, [0x48, 0xB8, 0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_mov_r32i() {
        // MOV ECX, 5 = B9 05 00 00 00
        assert_eq!(assemble(|a| a.mov_r32i(Reg::Rcx, 5)), [0xB9, 0x05, 0x00, 0x00, 0x00]);
        // MOV R9D, 2 = 41 B9 02 00 00 00
        assert_eq!(assemble(|a| a.mov_r32i(Reg::R9, 2)), [0x41, 0xB9, 0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_mov_rm_disp8() {
        // MOV RAX, [R14 + 0x10] = 49 8B 46 10
        let code = assemble(|a| a.mov_rm(Reg::Rax, Mem::base(Reg::R14, 0x10)));
        assert_eq!(code, [0x49, 0x8B, 0x46, 0x10]);
    }

    #[test]
    fn test_mov_rm_disp32() {
        // MOV RDX, [RAX + 0x200] = 48 8B 90 00 02 00 00
        let code = assemble(|a| a.mov_rm(Reg::Rdx, Mem::base(Reg::Rax, 0x200)));
        assert_eq!(code, [0x48, 0x8B, 0x90, 0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_mov_mr_r12_base_needs_sib() {
        // MOV [R12], RAX = 49 89 04 24
        let code = assemble(|a| a.mov_mr(Mem::base(Reg::R12, 0), Reg::Rax));
        assert_eq!(code, [0x49, 0x89, 0x04, 0x24]);
        // MOV [RSP + 8], RDX = 48 89 54 24 08
        let code = assemble(|a| a.mov_mr(Mem::base(Reg::Rsp, 8), Reg::Rdx));
        assert_eq!(code, [0x48, 0x89, 0x54, 0x24, 0x08]);
    }

    #[test]
    fn test_mov_rm_r13_base_needs_disp() {
        // MOV RAX, [R13 + 0] = 49 8B 45 00
        let code = assemble(|a| a.mov_rm(Reg::Rax, Mem::base(Reg::R13, 0)));
        assert_eq!(code, [0x49, 0x8B, 0x45, 0x00]);
    }

    #[test]
    fn test_lea_indexed() {
        // LEA RDI, [R14 + RAX] = 49 8D 3C 06
        let code = assemble(|a| a.lea(Reg::Rdi, Mem::indexed(Reg::R14, Reg::Rax, Scale::X1, 0)));
        assert_eq!(code, [0x49, 0x8D, 0x3C, 0x06]);
    }

    #[test]
    fn test_jmp_m_scaled_index() {
        // JMP [RDX + RAX*2] = FF 24 42
        let code = assemble(|a| a.jmp_m(Mem::indexed(Reg::Rdx, Reg::Rax, Scale::X2, 0)));
        assert_eq!(code, [0xFF, 0x24, 0x42]);
    }

    #[test]
    fn test_call_m() {
        // CALL [R13 + 8] = 41 FF 55 08
        let code = assemble(|a| a.call_m(Mem::base(Reg::R13, 8)));
        assert_eq!(code, [0x41, 0xFF, 0x55, 0x08]);
    }

    #[test]
    fn test_call_r() {
        // CALL RAX = FF D0
        assert_eq!(assemble(|a| a.call_r(Reg::Rax)), [0xFF, 0xD0]);
        // CALL R12 = 41 FF D4
        assert_eq!(assemble(|a| a.call_r(Reg::R12)), [0x41, 0xFF, 0xD4]);
    }

    #[test]
    fn test_movups() {
        // MOVUPS XMM0, [R14 + 0x20] = 41 0F 10 46 20
        let code = assemble(|a| a.movups_xm(XMM0, Mem::base(Reg::R14, 0x20)));
        assert_eq!(code, [0x41, 0x0F, 0x10, 0x46, 0x20]);
        // MOVUPS [RDI], XMM0 = 0F 11 07
        let code = assemble(|a| a.movups_mx(Mem::base(Reg::Rdi, 0), XMM0));
        assert_eq!(code, [0x0F, 0x11, 0x07]);
    }

    #[test]
    fn test_movsd_prefix_before_rex() {
        // MOVSD [R14 + 0x38], XMM0 = F2 41 0F 11 46 38
        let code = assemble(|a| a.movsd_mx(Mem::base(Reg::R14, 0x38), XMM0));
        assert_eq!(code, [0xF2, 0x41, 0x0F, 0x11, 0x46, 0x38]);
    }

    #[test]
    fn test_cvtsi2sd_r32() {
        // CVTSI2SD XMM0, EDX = F2 0F 2A C2
        assert_eq!(assemble(|a| a.cvtsi2sd_r32(XMM0, Reg::Rdx)), [0xF2, 0x0F, 0x2A, 0xC2]);
    }

    #[test]
    fn test_sqrtsd_and_roundsd() {
        // SQRTSD XMM0, [R14 + 0x10] = F2 41 0F 51 46 10
        let code = assemble(|a| a.sqrtsd_xm(XMM0, Mem::base(Reg::R14, 0x10)));
        assert_eq!(code, [0xF2, 0x41, 0x0F, 0x51, 0x46, 0x10]);
        // ROUNDSD XMM0, XMM0, 9 = 66 0F 3A 0B C0 09
        assert_eq!(assemble(|a| a.roundsd(XMM0, XMM0, 9)), [0x66, 0x0F, 0x3A, 0x0B, 0xC0, 0x09]);
    }

    #[test]
    fn test_test_m8i() {
        // TEST byte [RAX + 1], 1 = F6 40 01 01
        let code = assemble(|a| a.test_m8i(Mem::base(Reg::Rax, 1), 1));
        assert_eq!(code, [0xF6, 0x40, 0x01, 0x01]);
    }

    #[test]
    fn test_cmp_m32i() {
        // CMP dword [RAX + 12], 0 = 83 78 0C 00
        let code = assemble(|a| a.cmp_m32i(Mem::base(Reg::Rax, 12), 0));
        assert_eq!(code, [0x83, 0x78, 0x0C, 0x00]);
    }

    #[test]
    fn test_cmp_r32m() {
        // CMP ECX, [RDX + 8] = 3B 4A 08
        let code = assemble(|a| a.cmp_r32m(Reg::Rcx, Mem::base(Reg::Rdx, 8)));
        assert_eq!(code, [0x3B, 0x4A, 0x08]);
    }

    #[test]
    fn test_mov_m32i() {
        // MOV dword [RSI + 12], 0 = C7 46 0C 00 00 00 00
        let code = assemble(|a| a.mov_m32i(Mem::base(Reg::Rsi, 12), 0));
        assert_eq!(code, [0xC7, 0x46, 0x0C, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_movzx_r32m8() {
        // MOVZX EAX, byte [RCX] = 0F B6 01
        let code = assemble(|a| a.movzx_r32m8(Reg::Rax, Mem::base(Reg::Rcx, 0)));
        assert_eq!(code, [0x0F, 0xB6, 0x01]);
    }

    #[test]
    fn test_shifts() {
        // SAR EDX, 8 = C1 FA 08
        assert_eq!(assemble(|a| a.sar_r32i(Reg::Rdx, 8)), [0xC1, 0xFA, 0x08]);
        // SHL EDX, 8 = C1 E2 08
        assert_eq!(assemble(|a| a.shl_r32i(Reg::Rdx, 8)), [0xC1, 0xE2, 0x08]);
        // SHL RAX, 4 = 48 C1 E0 04
        assert_eq!(assemble(|a| a.shl_ri(Reg::Rax, 4)), [0x48, 0xC1, 0xE0, 0x04]);
        // SHL EAX, CL = D3 E0
        assert_eq!(assemble(|a| a.shl_r32cl(Reg::Rax)), [0xD3, 0xE0]);
    }

    #[test]
    fn test_inc_dec() {
        // INC RDX = 48 FF C2
        assert_eq!(assemble(|a| a.inc(Reg::Rdx)), [0x48, 0xFF, 0xC2]);
        // DEC ECX = FF C9
        assert_eq!(assemble(|a| a.dec32(Reg::Rcx)), [0xFF, 0xC9]);
    }

    #[test]
    fn test_alu_immediates() {
        // ADD RSI, 16 = 48 83 C6 10
        assert_eq!(assemble(|a| a.add_ri(Reg::Rsi, 16)), [0x48, 0x83, 0xC6, 0x10]);
        // SUB RSP, 0x100 = 48 81 EC 00 01 00 00
        assert_eq!(
            assemble(|a| a.sub_ri(Reg::Rsp, 0x100)),
            [0x48, 0x81, 0xEC, 0x00, 0x01, 0x00, 0x00]
        );
        // CMP EDX, 0x7FFFFF = 81 FA FF FF 7F 00
        assert_eq!(
            assemble(|a| a.cmp_r32i(Reg::Rdx, 0x7FFFFF)),
            [0x81, 0xFA, 0xFF, 0xFF, 0x7F, 0x00]
        );
    }

    #[test]
    fn test_setcc_and_test_r8() {
        // SETNE AL = 0F 95 C0
        assert_eq!(assemble(|a| a.setcc(Cond::Ne, Reg::Rax)), [0x0F, 0x95, 0xC0]);
        // SETE SIL needs a bare REX = 40 0F 94 C6
        assert_eq!(assemble(|a| a.setcc(Cond::E, Reg::Rsi)), [0x40, 0x0F, 0x94, 0xC6]);
        // TEST AL, AL = 84 C0
        assert_eq!(assemble(|a| a.test_rr8(Reg::Rax, Reg::Rax)), [0x84, 0xC0]);
    }

    #[test]
    fn test_push_pop_extended() {
        assert_eq!(assemble(|a| a.push(Reg::R12)), [0x41, 0x54]);
        assert_eq!(assemble(|a| a.pop(Reg::Rbx)), [0x5B]);
    }

    #[test]
    fn test_jmp_label_backward() {
        let code = assemble(|a| {
            let top = a.new_label();
            a.bind(top);
            a.jmp(top);
        });
        // JMP -5 = E9 FB FF FF FF
        assert_eq!(code, [0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_jcc_label_forward() {
        let code = assemble(|a| {
            let skip = a.new_label();
            a.jcc(Cond::E, skip);
            a.ret();
            a.bind(skip);
        });
        // JE +1; RET = 0F 84 01 00 00 00 C3
        assert_eq!(code, [0x0F, 0x84, 0x01, 0x00, 0x00, 0x00, 0xC3]);
    }

    #[test]
    fn test_cond_invert() {
        assert_eq!(Cond::E.invert(), Cond::Ne);
        assert_eq!(Cond::L.invert(), Cond::Ge);
        assert_eq!(Cond::A.invert(), Cond::Be);
    }
}
