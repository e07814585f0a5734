//! Lowering from IR to x86-64 object code.
//!
//! Every virtual register lives in a stack slot relative to RBP; RAX and
//! RCX are the scratch registers for expression evaluation. Nothing is
//! held in a caller-saved register across a call, so the only ABI
//! obligations are the argument registers, the 16-byte stack alignment at
//! call sites, and RBP itself.
//!
//! Calls to functions defined in the same object are emitted as
//! `CALL rel32` with a [`RelocKind::CallPcRel32`] relocation. External
//! callees get their address materialized into R11 via `MOV r64, imm64`
//! with a [`RelocKind::Abs64`] relocation and an indirect call, so the
//! distance between the object and the callee never matters.

use super::codebuf::{CodeBuffer, Label};
use super::object::{ObjectCode, RelocKind, Relocation, SymbolDef, SymbolFlags};
use super::target::HostTarget;
use super::x86_64::{Asm, Cond, Reg, ARG_REGS};
use crate::error::JitError;
use crate::ir::{BinOp, Function, Inst, Module, Terminator, Value};

/// Stateless IR-to-native compiler for the configured target.
#[derive(Debug, Clone, Copy)]
pub struct Compiler {
    target: HostTarget,
}

impl Compiler {
    pub fn new(target: HostTarget) -> Self {
        Self { target }
    }

    /// Compile one module to an object. Pure translation: safe to call
    /// concurrently for independent modules.
    pub fn compile(&self, module: &Module) -> Result<ObjectCode, JitError> {
        self.target.check_module(module)?;

        let local_names: Vec<&str> = module
            .functions()
            .iter()
            .map(|f| f.name.as_str())
            .collect();

        let mut buf = CodeBuffer::new();
        let mut symbols = Vec::new();
        let mut relocations = Vec::new();

        for func in module.functions() {
            buf.align(16);
            symbols.push(SymbolDef {
                name: func.name.clone(),
                offset: buf.offset(),
                flags: SymbolFlags::function(func.exported),
            });
            lower_function(module, func, &local_names, &mut buf, &mut relocations)?;
        }

        let code = buf
            .finish()
            .map_err(|reason| JitError::compilation(module.name(), reason))?;

        tracing::debug!(
            module = module.name(),
            bytes = code.len(),
            symbols = symbols.len(),
            relocations = relocations.len(),
            "compiled module"
        );

        Ok(ObjectCode {
            module_name: module.name().to_string(),
            module_id: module.id(),
            code,
            symbols,
            relocations,
        })
    }
}

/// RBP-relative slot for a virtual register.
fn slot(v: Value) -> i32 {
    -8 * (v.index() as i32 + 1)
}

/// Frame size covering all slots, kept 16-byte aligned so RSP stays
/// aligned at call sites.
fn frame_size(func: &Function) -> i32 {
    let raw = 8 * func.value_count as i32;
    (raw + 15) & !15
}

fn lower_function(
    module: &Module,
    func: &Function,
    local_names: &[&str],
    buf: &mut CodeBuffer,
    relocations: &mut Vec<Relocation>,
) -> Result<(), JitError> {
    if func.params as usize > ARG_REGS.len() {
        return Err(JitError::compilation(
            module.name(),
            format!(
                "function '{}' has {} parameters; at most {} are supported",
                func.name,
                func.params,
                ARG_REGS.len()
            ),
        ));
    }

    let labels: Vec<Label> = func.blocks.iter().map(|_| buf.new_label()).collect();
    let frame = frame_size(func);

    let mut asm = Asm::new(buf);
    asm.push(Reg::Rbp);
    asm.mov_rr(Reg::Rbp, Reg::Rsp);
    if frame > 0 {
        asm.sub_ri32(Reg::Rsp, frame);
    }
    for i in 0..func.params {
        asm.store(Reg::Rbp, slot(Value(i)), ARG_REGS[i as usize]);
    }

    for (index, block) in func.blocks.iter().enumerate() {
        buf.bind(labels[index]);
        for inst in &block.insts {
            lower_inst(module, func, inst, local_names, buf, relocations)?;
        }
        lower_terminator(&block.term, &labels, buf);
    }
    Ok(())
}

fn lower_inst(
    module: &Module,
    func: &Function,
    inst: &Inst,
    local_names: &[&str],
    buf: &mut CodeBuffer,
    relocations: &mut Vec<Relocation>,
) -> Result<(), JitError> {
    match inst {
        Inst::Const { dst, value } => {
            let mut asm = Asm::new(buf);
            asm.mov_ri(Reg::Rax, *value);
            asm.store(Reg::Rbp, slot(*dst), Reg::Rax);
        }
        Inst::Binary { dst, op, lhs, rhs } => {
            let mut asm = Asm::new(buf);
            asm.load(Reg::Rax, Reg::Rbp, slot(*lhs));
            asm.load(Reg::Rcx, Reg::Rbp, slot(*rhs));
            match op {
                BinOp::Add => asm.add_rr(Reg::Rax, Reg::Rcx),
                BinOp::Sub => asm.sub_rr(Reg::Rax, Reg::Rcx),
                BinOp::Mul => asm.imul_rr(Reg::Rax, Reg::Rcx),
                BinOp::Div => {
                    asm.cqo();
                    asm.idiv(Reg::Rcx);
                }
                BinOp::And => asm.and_rr(Reg::Rax, Reg::Rcx),
                BinOp::Or => asm.or_rr(Reg::Rax, Reg::Rcx),
                BinOp::Xor => asm.xor_rr(Reg::Rax, Reg::Rcx),
                BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    asm.cmp_rr(Reg::Rax, Reg::Rcx);
                    asm.setcc_al(compare_cond(*op));
                    asm.movzx_rax_al();
                }
            }
            asm.store(Reg::Rbp, slot(*dst), Reg::Rax);
        }
        Inst::Call { dst, callee, args } => {
            if args.len() > ARG_REGS.len() {
                return Err(JitError::compilation(
                    module.name(),
                    format!(
                        "call to '{}' in '{}' passes {} arguments; at most {} are supported",
                        callee,
                        func.name,
                        args.len(),
                        ARG_REGS.len()
                    ),
                ));
            }
            {
                let mut asm = Asm::new(buf);
                for (i, arg) in args.iter().enumerate() {
                    asm.load(ARG_REGS[i], Reg::Rbp, slot(*arg));
                }
            }
            if local_names.contains(&callee.as_str()) {
                Asm::new(buf).call_rel32(0);
                relocations.push(Relocation {
                    offset: buf.offset() - 4,
                    kind: RelocKind::CallPcRel32,
                    symbol: callee.clone(),
                });
            } else {
                Asm::new(buf).mov_ri64(Reg::R11, 0);
                relocations.push(Relocation {
                    offset: buf.offset() - 8,
                    kind: RelocKind::Abs64,
                    symbol: callee.clone(),
                });
                Asm::new(buf).call_r(Reg::R11);
            }
            Asm::new(buf).store(Reg::Rbp, slot(*dst), Reg::Rax);
        }
    }
    Ok(())
}

fn lower_terminator(term: &Terminator, labels: &[Label], buf: &mut CodeBuffer) {
    let mut asm = Asm::new(buf);
    match term {
        Terminator::Return(v) => {
            asm.load(Reg::Rax, Reg::Rbp, slot(*v));
            asm.mov_rr(Reg::Rsp, Reg::Rbp);
            asm.pop(Reg::Rbp);
            asm.ret();
        }
        Terminator::Jump(dest) => {
            asm.jmp(labels[dest.index()]);
        }
        Terminator::Branch {
            cond,
            then_dest,
            else_dest,
        } => {
            asm.load(Reg::Rax, Reg::Rbp, slot(*cond));
            asm.test_rr(Reg::Rax, Reg::Rax);
            asm.jcc(Cond::Ne, labels[then_dest.index()]);
            asm.jmp(labels[else_dest.index()]);
        }
    }
}

fn compare_cond(op: BinOp) -> Cond {
    match op {
        BinOp::Eq => Cond::E,
        BinOp::Ne => Cond::Ne,
        BinOp::Lt => Cond::L,
        BinOp::Le => Cond::Le,
        BinOp::Gt => Cond::G,
        BinOp::Ge => Cond::Ge,
        _ => unreachable!("not a comparison"),
    }
}
