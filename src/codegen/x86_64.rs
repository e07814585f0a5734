//! x86-64 instruction encoding (System V AMD64).
//!
//! Only the instructions the lowering emits are provided. All data ops
//! are 64-bit (REX.W). Memory operands are `[base + disp]` with a
//! non-RSP/R12 base, which sidesteps SIB encoding entirely; the compiler
//! addresses spill slots relative to RBP only.

use super::codebuf::{CodeBuffer, Label};

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

/// Integer argument registers, System V AMD64 order.
pub const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

impl Reg {
    fn code(self) -> u8 {
        (self as u8) & 0x7
    }

    fn needs_rex_ext(self) -> bool {
        (self as u8) >= 8
    }

    fn rex_b(self) -> u8 {
        if self.needs_rex_ext() { 0x01 } else { 0x00 }
    }

    fn rex_r(self) -> u8 {
        if self.needs_rex_ext() { 0x04 } else { 0x00 }
    }
}

/// Condition codes for Jcc/SETcc (signed comparisons plus equality).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    E = 0x4,
    Ne = 0x5,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

/// Assembler writing into a [`CodeBuffer`].
pub struct Asm<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> Asm<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Self { buf }
    }

    fn rex_w(&mut self, reg: Reg, rm: Reg) {
        self.buf.emit_u8(0x48 | reg.rex_r() | rm.rex_b());
    }

    fn rex_w_single(&mut self, rm: Reg) {
        self.buf.emit_u8(0x48 | rm.rex_b());
    }

    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// ModR/M for `[base + disp]` plus the displacement bytes.
    fn mem_operand(&mut self, reg: Reg, base: Reg, disp: i32) {
        debug_assert!(
            base != Reg::Rsp && base != Reg::R12,
            "RSP/R12 bases need SIB encoding"
        );
        // RBP/R13 with mod=00 would mean RIP-relative, so always emit a
        // displacement.
        if (-128..=127).contains(&disp) {
            self.buf.emit_u8(Self::modrm(0b01, reg.code(), base.code()));
            self.buf.emit_u8(disp as u8);
        } else {
            self.buf.emit_u8(Self::modrm(0b10, reg.code(), base.code()));
            self.buf.emit_u32(disp as u32);
        }
    }

    // ---- data movement ----

    /// MOV dst, src
    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x89);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// MOV dst, imm — picks the sign-extended imm32 form when it fits.
    pub fn mov_ri(&mut self, dst: Reg, imm: i64) {
        if imm >= i32::MIN as i64 && imm <= i32::MAX as i64 {
            self.rex_w_single(dst);
            self.buf.emit_u8(0xC7);
            self.buf.emit_u8(Self::modrm(0b11, 0, dst.code()));
            self.buf.emit_u32(imm as i32 as u32);
        } else {
            self.mov_ri64(dst, imm);
        }
    }

    /// MOV dst, imm64 — always the full 10-byte form. Used for address
    /// materialization so the linker has a fixed-width field to patch.
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.rex_w_single(dst);
        self.buf.emit_u8(0xB8 + dst.code());
        self.buf.emit_u64(imm as u64);
    }

    /// MOV dst, [base + disp]
    pub fn load(&mut self, dst: Reg, base: Reg, disp: i32) {
        self.rex_w(dst, base);
        self.buf.emit_u8(0x8B);
        self.mem_operand(dst, base, disp);
    }

    /// MOV [base + disp], src
    pub fn store(&mut self, base: Reg, disp: i32, src: Reg) {
        self.rex_w(src, base);
        self.buf.emit_u8(0x89);
        self.mem_operand(src, base, disp);
    }

    // ---- arithmetic and logic ----

    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x01);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    pub fn sub_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x29);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    pub fn imul_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(dst, src);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0xAF);
        self.buf.emit_u8(Self::modrm(0b11, dst.code(), src.code()));
    }

    pub fn and_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x21);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    pub fn or_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x09);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    pub fn xor_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x31);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    pub fn cmp_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x39);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    pub fn test_rr(&mut self, dst: Reg, src: Reg) {
        self.rex_w(src, dst);
        self.buf.emit_u8(0x85);
        self.buf.emit_u8(Self::modrm(0b11, src.code(), dst.code()));
    }

    /// SUB dst, imm32 (sign-extended; imm8 form when it fits)
    pub fn sub_ri32(&mut self, dst: Reg, imm: i32) {
        self.rex_w_single(dst);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83);
            self.buf.emit_u8(Self::modrm(0b11, 5, dst.code()));
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81);
            self.buf.emit_u8(Self::modrm(0b11, 5, dst.code()));
            self.buf.emit_u32(imm as u32);
        }
    }

    /// CQO: sign-extend RAX into RDX:RAX (before IDIV)
    pub fn cqo(&mut self) {
        self.buf.emit_u8(0x48);
        self.buf.emit_u8(0x99);
    }

    /// IDIV src: RDX:RAX / src -> quotient RAX, remainder RDX
    pub fn idiv(&mut self, src: Reg) {
        self.rex_w_single(src);
        self.buf.emit_u8(0xF7);
        self.buf.emit_u8(Self::modrm(0b11, 7, src.code()));
    }

    /// SETcc AL
    pub fn setcc_al(&mut self, cond: Cond) {
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x90 + cond as u8);
        self.buf.emit_u8(Self::modrm(0b11, 0, 0));
    }

    /// MOVZX RAX, AL
    pub fn movzx_rax_al(&mut self) {
        self.buf.emit_u8(0x48);
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0xB6);
        self.buf.emit_u8(Self::modrm(0b11, 0, 0));
    }

    // ---- stack ----

    pub fn push(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x50 + reg.code());
    }

    pub fn pop(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0x58 + reg.code());
    }

    // ---- control flow ----

    /// JMP to a buffer label (rel32, patched at finish)
    pub fn jmp(&mut self, label: Label) {
        self.buf.emit_u8(0xE9);
        self.buf.emit_rel32_to(label);
    }

    /// Jcc to a buffer label (rel32, patched at finish)
    pub fn jcc(&mut self, cond: Cond, label: Label) {
        self.buf.emit_u8(0x0F);
        self.buf.emit_u8(0x80 + cond as u8);
        self.buf.emit_rel32_to(label);
    }

    /// CALL rel32 with an explicit displacement (relocation patch site)
    pub fn call_rel32(&mut self, disp: i32) {
        self.buf.emit_u8(0xE8);
        self.buf.emit_u32(disp as u32);
    }

    /// CALL through a register
    pub fn call_r(&mut self, reg: Reg) {
        if reg.needs_rex_ext() {
            self.buf.emit_u8(0x41);
        }
        self.buf.emit_u8(0xFF);
        self.buf.emit_u8(Self::modrm(0b11, 2, reg.code()));
    }

    pub fn ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }
}
