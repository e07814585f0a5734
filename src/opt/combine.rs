//! Instruction combining: constant folding, algebraic identities, and
//! dead pure-instruction elimination.

use std::collections::{HashMap, HashSet};

use super::{collect_consts, replace_uses, Pass};
use crate::ir::{BinOp, Function, Inst, Terminator, Value};

pub struct Combine;

impl Pass for Combine {
    fn name(&self) -> &'static str {
        "combine"
    }

    fn run(&self, mut func: Function) -> Function {
        loop {
            let mut changed = simplify_once(&mut func);
            changed |= eliminate_dead(&mut func);
            if !changed {
                return func;
            }
        }
    }
}

fn simplify_once(func: &mut Function) -> bool {
    let consts = collect_consts(func);
    let mut subst: HashMap<Value, Value> = HashMap::new();
    let mut changed = false;

    for block in &mut func.blocks {
        for inst in &mut block.insts {
            let Inst::Binary { dst, op, lhs, rhs } = *inst else {
                continue;
            };
            let lc = consts.get(&lhs).copied();
            let rc = consts.get(&rhs).copied();

            // Both operands constant: fold outright. Division stays put
            // when folding would hide a runtime trap.
            if let (Some(l), Some(r)) = (lc, rc) {
                if let Some(value) = op.apply(l, r) {
                    *inst = Inst::Const { dst, value };
                    changed = true;
                    continue;
                }
            }

            if let Some(value) = constant_identity(op, lhs, rhs, lc, rc) {
                *inst = Inst::Const { dst, value };
                changed = true;
            } else if let Some(src) = copy_identity(op, lhs, rhs, lc, rc) {
                subst.insert(dst, src);
                changed = true;
            }
        }
    }

    if !subst.is_empty() {
        for block in &mut func.blocks {
            block.insts.retain(|inst| !subst.contains_key(&inst.dst()));
        }
        replace_uses(func, &subst);
    }
    changed
}

/// Identities whose result is a known constant.
fn constant_identity(
    op: BinOp,
    lhs: Value,
    rhs: Value,
    lc: Option<i64>,
    rc: Option<i64>,
) -> Option<i64> {
    let same = lhs == rhs;
    match op {
        BinOp::Sub | BinOp::Xor if same => Some(0),
        BinOp::Mul | BinOp::And if lc == Some(0) || rc == Some(0) => Some(0),
        BinOp::Eq | BinOp::Le | BinOp::Ge if same => Some(1),
        BinOp::Ne | BinOp::Lt | BinOp::Gt if same => Some(0),
        _ => None,
    }
}

/// Identities whose result is one of the operands.
fn copy_identity(
    op: BinOp,
    lhs: Value,
    rhs: Value,
    lc: Option<i64>,
    rc: Option<i64>,
) -> Option<Value> {
    match op {
        // checked first so the zero-identity arm below cannot swallow
        // the `x | x` case
        BinOp::And | BinOp::Or if lhs == rhs => Some(lhs),
        BinOp::Add | BinOp::Or | BinOp::Xor => match (lc, rc) {
            (Some(0), _) => Some(rhs),
            (_, Some(0)) => Some(lhs),
            _ => None,
        },
        BinOp::Sub if rc == Some(0) => Some(lhs),
        BinOp::Mul => match (lc, rc) {
            (Some(1), _) => Some(rhs),
            (_, Some(1)) => Some(lhs),
            _ => None,
        },
        BinOp::Div if rc == Some(1) => Some(lhs),
        _ => None,
    }
}

/// Remove pure instructions whose result is never read. Calls always stay
/// (side effects); division stays (may trap).
fn eliminate_dead(func: &mut Function) -> bool {
    let mut used: HashSet<Value> = HashSet::new();
    for block in &func.blocks {
        for inst in &block.insts {
            match inst {
                Inst::Const { .. } => {}
                Inst::Binary { lhs, rhs, .. } => {
                    used.insert(*lhs);
                    used.insert(*rhs);
                }
                Inst::Call { args, .. } => used.extend(args.iter().copied()),
            }
        }
        match &block.term {
            Terminator::Return(v) => {
                used.insert(*v);
            }
            Terminator::Jump(_) => {}
            Terminator::Branch { cond, .. } => {
                used.insert(*cond);
            }
        }
    }

    let mut changed = false;
    for block in &mut func.blocks {
        let before = block.insts.len();
        block.insts.retain(|inst| match inst {
            Inst::Const { dst, .. } => used.contains(dst),
            Inst::Binary { dst, op, .. } => *op == BinOp::Div || used.contains(dst),
            Inst::Call { .. } => true,
        });
        changed |= block.insts.len() != before;
    }
    changed
}
