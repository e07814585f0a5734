//! Reassociation: canonical operand ordering for commutative operations.
//!
//! Commutative operands are sorted by register number, so `a + b` and
//! `b + a` become textually identical and the value-numbering pass that
//! runs next can recognize them as the same computation.

use super::Pass;
use crate::ir::{Function, Inst};

pub struct Reassociate;

impl Pass for Reassociate {
    fn name(&self) -> &'static str {
        "reassociate"
    }

    fn run(&self, mut func: Function) -> Function {
        for block in &mut func.blocks {
            for inst in &mut block.insts {
                if let Inst::Binary { op, lhs, rhs, .. } = inst {
                    if op.commutative() && lhs.0 > rhs.0 {
                        std::mem::swap(lhs, rhs);
                    }
                }
            }
        }
        func
    }
}
