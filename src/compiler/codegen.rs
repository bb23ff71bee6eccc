//! x86-64 (SysV AMD64) code generator (spec.md §4.4, C4).
//!
//! Every method here appends bytes to an [`Arena`] and returns the offset
//! the emitted instruction started at. Registers are addressed by the
//! logical numbering spec.md §4.4 assigns (0=RAX ... 9=R9, 12=R12), which
//! also happens to be the x86-64 register-field encoding, so `Reg::encoding()`
//! is the identity function split into the `REX.B`/`REX.R`/`REX.X` extension
//! bit plus a 3-bit ModRM/opcode field.

use crate::compiler::arena::{Arena, Relocation, RelocationKind};
use crate::error::Result;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg(pub u8);

impl Reg {
    pub const RAX: Reg = Reg(0);
    pub const RCX: Reg = Reg(1);
    pub const RDX: Reg = Reg(2);
    pub const RBX: Reg = Reg(3);
    pub const RSP: Reg = Reg(4);
    pub const RBP: Reg = Reg(5);
    pub const RSI: Reg = Reg(6);
    pub const RDI: Reg = Reg(7);
    pub const R8: Reg = Reg(8);
    pub const R9: Reg = Reg(9);
    pub const R12: Reg = Reg(12);

    /// SysV argument-passing order for the first six integer arguments.
    pub const ARG_REGS: [Reg; 6] = [Reg::RDI, Reg::RSI, Reg::RDX, Reg::RCX, Reg::R8, Reg::R9];

    fn low3(self) -> u8 {
        self.0 & 0x7
    }

    fn needs_rex_extension(self) -> bool {
        self.0 >= 8
    }
}

/// Comparison condition codes used by `setcc` and conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Condition {
    fn setcc_opcode(self) -> u8 {
        match self {
            Condition::Equal => 0x94,
            Condition::NotEqual => 0x95,
            Condition::Less => 0x9C,
            Condition::LessEqual => 0x9E,
            Condition::Greater => 0x9F,
            Condition::GreaterEqual => 0x9D,
        }
    }

    fn jcc_opcode(self) -> u8 {
        match self {
            Condition::Equal => 0x84,
            Condition::NotEqual => 0x85,
            Condition::Less => 0x8C,
            Condition::LessEqual => 0x8E,
            Condition::Greater => 0x8F,
            Condition::GreaterEqual => 0x8D,
        }
    }
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// Pending intra-function jump whose target label hasn't been emitted yet.
struct PendingLabel {
    patch_offset: usize,
    instruction_end_offset: usize,
    label: String,
}

/// Stateful x86-64 emitter: wraps an [`Arena`] with label bookkeeping and
/// the fixed SysV prologue/epilogue shape every compiled function shares.
pub struct CodeGenerator<'a> {
    arena: &'a mut Arena,
    stack_size: i64,
    pending_labels: Vec<PendingLabel>,
    defined_labels: HashMap<String, usize>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(arena: &'a mut Arena) -> Self {
        CodeGenerator {
            arena,
            stack_size: 0,
            pending_labels: Vec::new(),
            defined_labels: HashMap::new(),
        }
    }

    pub fn offset(&self) -> usize {
        self.arena.len()
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<usize> {
        self.arena.append(bytes)
    }

    // ---- data movement -----------------------------------------------

    pub fn mov_reg_imm(&mut self, dst: Reg, imm: i64) -> Result<usize> {
        // movabs reg, imm64
        let mut bytes = vec![rex(true, false, false, dst.needs_rex_extension())];
        bytes.push(0xB8 + dst.low3());
        bytes.extend_from_slice(&imm.to_le_bytes());
        self.emit(&bytes)
    }

    pub fn mov_reg_reg(&mut self, dst: Reg, src: Reg) -> Result<usize> {
        // mov dst, src  (89 /r: reg field is source, rm field is dest)
        let bytes = [
            rex(true, src.needs_rex_extension(), false, dst.needs_rex_extension()),
            0x89,
            modrm(0b11, src.low3(), dst.low3()),
        ];
        self.emit(&bytes)
    }

    /// `mov dst, [rbp+offset]`
    pub fn mov_reg_mem(&mut self, dst: Reg, rbp_offset: i64) -> Result<usize> {
        self.mov_reg_mem_base(dst, Reg::RBP, rbp_offset)
    }

    /// `mov [rbp+offset], src`
    pub fn mov_mem_reg(&mut self, rbp_offset: i64, src: Reg) -> Result<usize> {
        self.mov_mem_base_reg(Reg::RBP, rbp_offset, src)
    }

    pub fn mov_reg_mem_rsp(&mut self, dst: Reg, rsp_offset: i64) -> Result<usize> {
        self.mov_reg_mem_base(dst, Reg::RSP, rsp_offset)
    }

    pub fn mov_mem_rsp_reg(&mut self, rsp_offset: i64, src: Reg) -> Result<usize> {
        self.mov_mem_base_reg(Reg::RSP, rsp_offset, src)
    }

    fn mov_reg_mem_base(&mut self, dst: Reg, base: Reg, offset: i64) -> Result<usize> {
        let mut bytes = vec![rex(true, dst.needs_rex_extension(), false, base.needs_rex_extension())];
        bytes.push(0x8B);
        self.push_modrm_disp(&mut bytes, dst, base, offset);
        self.emit(&bytes)
    }

    fn mov_mem_base_reg(&mut self, base: Reg, offset: i64, src: Reg) -> Result<usize> {
        let mut bytes = vec![rex(true, src.needs_rex_extension(), false, base.needs_rex_extension())];
        bytes.push(0x89);
        self.push_modrm_disp(&mut bytes, src, base, offset);
        self.emit(&bytes)
    }

    /// Appends ModRM (+ SIB for RSP-as-base) and an 8- or 32-bit
    /// displacement for `[base+disp]`, using `reg_field` as the ModRM
    /// reg bits.
    fn push_modrm_disp(&self, bytes: &mut Vec<u8>, reg_field: Reg, base: Reg, disp: i64) {
        let mode = if disp == 0 && base.low3() != 0b101 {
            0b00
        } else if (-128..=127).contains(&disp) {
            0b01
        } else {
            0b10
        };
        bytes.push(modrm(mode, reg_field.low3(), base.low3()));
        if base.low3() == 0b100 {
            // RSP/R12 as base requires an SIB byte (no index, scale 0).
            bytes.push(0x24);
        }
        match mode {
            0b00 => {}
            0b01 => bytes.push(disp as i8 as u8),
            _ => bytes.extend_from_slice(&(disp as i32).to_le_bytes()),
        }
    }

    // ---- arithmetic -----------------------------------------------------

    pub fn add_reg_reg(&mut self, dst: Reg, src: Reg) -> Result<usize> {
        self.arith_reg_reg(0x01, dst, src)
    }

    pub fn sub_reg_reg(&mut self, dst: Reg, src: Reg) -> Result<usize> {
        self.arith_reg_reg(0x29, dst, src)
    }

    /// `imul dst, src` (two-operand form, 0F AF /r).
    pub fn mul_reg_reg(&mut self, dst: Reg, src: Reg) -> Result<usize> {
        let bytes = [
            rex(true, dst.needs_rex_extension(), false, src.needs_rex_extension()),
            0x0F,
            0xAF,
            modrm(0b11, dst.low3(), src.low3()),
        ];
        self.emit(&bytes)
    }

    /// Signed 64-bit division: RAX:RDX / src -> quotient in RAX.
    /// Caller is responsible for sign-extending RAX into RDX first
    /// (`cqo`), which this helper includes since every emitted division
    /// needs it.
    pub fn div_reg_reg(&mut self, dst: Reg, src: Reg) -> Result<usize> {
        debug_assert_eq!(dst, Reg::RAX, "division result convention fixes dst=RAX");
        let start = self.offset();
        self.emit(&[0x48, 0x99])?; // cqo
        let bytes = [
            rex(true, false, false, src.needs_rex_extension()),
            0xF7,
            modrm(0b11, 0b111, src.low3()),
        ];
        self.emit(&bytes)?;
        Ok(start)
    }

    fn arith_reg_reg(&mut self, opcode: u8, dst: Reg, src: Reg) -> Result<usize> {
        let bytes = [
            rex(true, src.needs_rex_extension(), false, dst.needs_rex_extension()),
            opcode,
            modrm(0b11, src.low3(), dst.low3()),
        ];
        self.emit(&bytes)
    }

    pub fn add_reg_imm(&mut self, dst: Reg, imm: i32) -> Result<usize> {
        self.arith_reg_imm(0b000, dst, imm)
    }

    pub fn sub_reg_imm(&mut self, dst: Reg, imm: i32) -> Result<usize> {
        self.arith_reg_imm(0b101, dst, imm)
    }

    pub fn and_reg_imm(&mut self, dst: Reg, imm: i32) -> Result<usize> {
        self.arith_reg_imm(0b100, dst, imm)
    }

    pub fn xor_reg_imm(&mut self, dst: Reg, imm: i32) -> Result<usize> {
        self.arith_reg_imm(0b110, dst, imm)
    }

    fn arith_reg_imm(&mut self, reg_field: u8, dst: Reg, imm: i32) -> Result<usize> {
        let mut bytes = vec![rex(true, false, false, dst.needs_rex_extension()), 0x81];
        bytes.push(modrm(0b11, reg_field, dst.low3()));
        bytes.extend_from_slice(&imm.to_le_bytes());
        self.emit(&bytes)
    }

    /// `cmp left, right`
    pub fn compare(&mut self, left: Reg, right: Reg) -> Result<usize> {
        let bytes = [
            rex(true, right.needs_rex_extension(), false, left.needs_rex_extension()),
            0x39,
            modrm(0b11, right.low3(), left.low3()),
        ];
        self.emit(&bytes)
    }

    fn setcc(&mut self, cond: Condition, dst: Reg) -> Result<usize> {
        let mut bytes = Vec::new();
        if dst.needs_rex_extension() || dst.0 >= 4 {
            bytes.push(rex(false, false, false, dst.needs_rex_extension()));
        }
        bytes.push(0x0F);
        bytes.push(cond.setcc_opcode());
        bytes.push(modrm(0b11, 0, dst.low3()));
        self.emit(&bytes)
    }

    pub fn setl(&mut self, dst: Reg) -> Result<usize> {
        self.setcc(Condition::Less, dst)
    }
    pub fn setg(&mut self, dst: Reg) -> Result<usize> {
        self.setcc(Condition::Greater, dst)
    }
    pub fn setle(&mut self, dst: Reg) -> Result<usize> {
        self.setcc(Condition::LessEqual, dst)
    }
    pub fn setge(&mut self, dst: Reg) -> Result<usize> {
        self.setcc(Condition::GreaterEqual, dst)
    }
    pub fn sete(&mut self, dst: Reg) -> Result<usize> {
        self.setcc(Condition::Equal, dst)
    }
    pub fn setne(&mut self, dst: Reg) -> Result<usize> {
        self.setcc(Condition::NotEqual, dst)
    }

    // ---- control flow ---------------------------------------------------

    /// Unconditional jump to a (possibly not-yet-defined) label.
    pub fn jump(&mut self, label: &str) -> Result<usize> {
        let start = self.offset();
        self.emit(&[0xE9, 0, 0, 0, 0])?;
        self.record_pending(start + 1, start + 5, label);
        Ok(start)
    }

    pub fn jump_if_zero(&mut self, label: &str) -> Result<usize> {
        self.jump_cc(Condition::Equal, label)
    }

    pub fn jump_if_not_zero(&mut self, label: &str) -> Result<usize> {
        self.jump_cc(Condition::NotEqual, label)
    }

    fn jump_cc(&mut self, cond: Condition, label: &str) -> Result<usize> {
        // `test rax, rax` then `jcc rel32`, since spec.md's jump_if_zero /
        // jump_if_not_zero are defined over "the current result" in RAX.
        let start = self.offset();
        self.emit(&[0x48, 0x85, modrm(0b11, 0, 0)])?; // test rax, rax
        let jcc_start = self.offset();
        self.emit(&[0x0F, cond.jcc_opcode(), 0, 0, 0, 0])?;
        self.record_pending(jcc_start + 2, jcc_start + 6, label);
        Ok(start)
    }

    fn record_pending(&mut self, patch_offset: usize, instruction_end_offset: usize, label: &str) {
        self.pending_labels.push(PendingLabel {
            patch_offset,
            instruction_end_offset,
            label: label.to_string(),
        });
    }

    /// Defines `name` at the current offset. If later jumps already target
    /// it we still resolve everything uniformly at arena finalization
    /// (spec.md §4.4 "Label resolution"); this just records where it is.
    pub fn label(&mut self, name: &str) -> Result<()> {
        let offset = self.offset();
        self.defined_labels.insert(name.to_string(), offset);
        self.arena.define_symbol(name, offset)
    }

    /// `call symbol`: resolves immediately if the address is already known
    /// in the name table, otherwise leaves a relocation for arena
    /// finalization (spec.md §4.4).
    pub fn call(&mut self, symbol: &str) -> Result<usize> {
        let start = self.offset();
        self.emit(&[0xE8, 0, 0, 0, 0])?;
        self.arena.add_relocation(Relocation {
            patch_offset: start + 1,
            kind: RelocationKind::Rel32 { instruction_end_offset: start + 5 },
            target_symbol: symbol.to_string(),
        })?;
        Ok(start)
    }

    /// `call reg`: indirect call through a register holding a computed
    /// address (function-ID lookup result, spec.md §4.5 FunctionExpression).
    pub fn call_reg(&mut self, reg: Reg) -> Result<usize> {
        let mut bytes = Vec::new();
        if reg.needs_rex_extension() {
            bytes.push(rex(false, false, false, true));
        }
        bytes.push(0xFF);
        bytes.push(modrm(0b11, 0b010, reg.low3()));
        self.emit(&bytes)
    }

    /// `lea dst, [rip+disp]` resolved against `symbol`, used when a
    /// function's address isn't known yet but its arena offset is
    /// (spec.md §4.5 FunctionExpression "offset form").
    pub fn lea_rip_symbol(&mut self, dst: Reg, symbol: &str) -> Result<usize> {
        let start = self.offset();
        let mut bytes = vec![rex(true, dst.needs_rex_extension(), false, false), 0x8D];
        bytes.push(modrm(0b00, dst.low3(), 0b101));
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        self.emit(&bytes)?;
        self.arena.add_relocation(Relocation {
            patch_offset: start + bytes.len() - 4,
            kind: RelocationKind::Rel32 { instruction_end_offset: start + bytes.len() },
            target_symbol: symbol.to_string(),
        })?;
        Ok(start)
    }

    pub fn push_reg(&mut self, reg: Reg) -> Result<usize> {
        let mut bytes = Vec::new();
        if reg.needs_rex_extension() {
            bytes.push(rex(false, false, false, true));
        }
        bytes.push(0x50 + reg.low3());
        self.emit(&bytes)
    }

    pub fn pop_reg(&mut self, reg: Reg) -> Result<usize> {
        let mut bytes = Vec::new();
        if reg.needs_rex_extension() {
            bytes.push(rex(false, false, false, true));
        }
        bytes.push(0x58 + reg.low3());
        self.emit(&bytes)
    }

    // ---- function framing -------------------------------------------------

    /// Rounds up to 16 bytes, per spec.md §4.4/§8 (stack frames are always
    /// a multiple of 16 and at least 80).
    pub fn set_function_stack_size(&mut self, bytes: i64) {
        let padded = ((bytes.max(80)) + 15) / 16 * 16;
        self.stack_size = padded;
    }

    pub fn prologue(&mut self) -> Result<usize> {
        let start = self.offset();
        self.push_reg(Reg::RBP)?;
        self.mov_reg_reg(Reg::RBP, Reg::RSP)?;
        if self.stack_size > 0 {
            self.sub_reg_imm(Reg::RSP, self.stack_size as i32)?;
        }
        Ok(start)
    }

    /// Spills the first `n` SysV argument registers to their parameter
    /// slots immediately, so every later emitter sees a uniform memory
    /// model (spec.md §4.4).
    pub fn spill_params(&mut self, n: usize) -> Result<()> {
        for (i, reg) in Reg::ARG_REGS.iter().take(n).enumerate() {
            let offset = -8 * (i as i64 + 1);
            self.mov_mem_reg(offset, *reg)?;
        }
        Ok(())
    }

    pub fn epilogue(&mut self) -> Result<usize> {
        let start = self.offset();
        self.mov_reg_reg(Reg::RSP, Reg::RBP)?;
        self.pop_reg(Reg::RBP)?;
        Ok(start)
    }

    pub fn function_return(&mut self) -> Result<usize> {
        self.epilogue()?;
        self.emit(&[0xC3])
    }

    pub fn ret_immediate(&mut self) -> Result<usize> {
        self.emit(&[0xC3])
    }

    /// Walks every recorded intra-buffer jump and turns it into an arena
    /// relocation resolved against this function's own label table. Call
    /// once a function body is fully emitted (spec.md §4.4 "Label
    /// resolution"): unresolved labels become relocations pointing at
    /// names with no definition anywhere, which `Arena::finalize` reports
    /// as a link error — the fatal code-generation error spec.md §4.4
    /// requires.
    pub fn flush_labels(&mut self) -> Result<()> {
        for pending in self.pending_labels.drain(..) {
            self.arena.add_relocation(Relocation {
                patch_offset: pending.patch_offset,
                kind: RelocationKind::Rel32 {
                    instruction_end_offset: pending.instruction_end_offset,
                },
                target_symbol: pending.label,
            })?;
        }
        Ok(())
    }

    pub fn stack_size(&self) -> i64 {
        self.stack_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::arena::Arena;

    #[test]
    fn mov_reg_imm_then_ret_returns_the_immediate() {
        let mut arena = Arena::new();
        {
            let mut cg = CodeGenerator::new(&mut arena);
            cg.mov_reg_imm(Reg::RAX, 42).unwrap();
            cg.ret_immediate().unwrap();
        }
        arena.finalize(|_| None).unwrap();
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        assert_eq!(f(), 42);
    }

    #[test]
    fn add_reg_reg_computes_sum() {
        let mut arena = Arena::new();
        {
            let mut cg = CodeGenerator::new(&mut arena);
            cg.mov_reg_imm(Reg::RAX, 2).unwrap();
            cg.mov_reg_imm(Reg::RCX, 40).unwrap();
            cg.add_reg_reg(Reg::RAX, Reg::RCX).unwrap();
            cg.ret_immediate().unwrap();
        }
        arena.finalize(|_| None).unwrap();
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        assert_eq!(f(), 42);
    }

    #[test]
    fn prologue_and_locals_round_trip_through_memory() {
        let mut arena = Arena::new();
        {
            let mut cg = CodeGenerator::new(&mut arena);
            cg.set_function_stack_size(16);
            cg.prologue().unwrap();
            cg.mov_reg_imm(Reg::RAX, 7).unwrap();
            cg.mov_mem_reg(-8, Reg::RAX).unwrap();
            cg.mov_reg_imm(Reg::RAX, 0).unwrap();
            cg.mov_reg_mem(Reg::RAX, -8).unwrap();
            cg.function_return().unwrap();
        }
        arena.finalize(|_| None).unwrap();
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        assert_eq!(f(), 7);
    }

    #[test]
    fn forward_jump_resolves_at_finalize() {
        let mut arena = Arena::new();
        {
            let mut cg = CodeGenerator::new(&mut arena);
            cg.mov_reg_imm(Reg::RAX, 1).unwrap();
            cg.jump("end").unwrap();
            cg.mov_reg_imm(Reg::RAX, 999).unwrap(); // skipped
            cg.label("end").unwrap();
            cg.ret_immediate().unwrap();
            cg.flush_labels().unwrap();
        }
        arena.finalize(|_| None).unwrap();
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        assert_eq!(f(), 1);
    }

    #[test]
    fn unresolved_label_is_a_fatal_link_error() {
        let mut arena = Arena::new();
        {
            let mut cg = CodeGenerator::new(&mut arena);
            cg.jump("nowhere").unwrap();
            cg.ret_immediate().unwrap();
            cg.flush_labels().unwrap();
        }
        assert!(arena.finalize(|_| None).is_err());
    }

    #[test]
    fn stack_size_rounds_up_to_sixteen_with_floor_eighty() {
        let mut arena = Arena::new();
        let mut cg = CodeGenerator::new(&mut arena);
        cg.set_function_stack_size(10);
        assert_eq!(cg.stack_size(), 80);
        cg.set_function_stack_size(90);
        assert_eq!(cg.stack_size(), 96);
    }

    #[test]
    fn compare_and_setl_produce_a_boolean() {
        let mut arena = Arena::new();
        {
            let mut cg = CodeGenerator::new(&mut arena);
            cg.mov_reg_imm(Reg::RAX, 3).unwrap();
            cg.mov_reg_imm(Reg::RCX, 5).unwrap();
            cg.compare(Reg::RAX, Reg::RCX).unwrap();
            cg.setl(Reg::RAX).unwrap();
            cg.and_reg_imm(Reg::RAX, 0xFF).unwrap();
            cg.ret_immediate().unwrap();
        }
        arena.finalize(|_| None).unwrap();
        let base = arena.base_ptr().unwrap();
        let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(base) };
        assert_eq!(f(), 1);
    }
}
