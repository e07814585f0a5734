//! Local value numbering: redundant computation elimination.
//!
//! Within each basic block, repeated constants and repeated binary
//! expressions over the same operands are replaced by the first
//! occurrence. Calls are never numbered (side effects). Substitutions are
//! applied function-wide, which is safe because the first occurrence
//! dominates every use of the duplicate it replaces.

use std::collections::HashMap;

use super::{replace_uses, Pass};
use crate::ir::{BinOp, Function, Inst, Value};

pub struct ValueNumbering;

#[derive(PartialEq, Eq, Hash)]
enum Key {
    Const(i64),
    Binary(BinOp, Value, Value),
}

impl Pass for ValueNumbering {
    fn name(&self) -> &'static str {
        "gvn"
    }

    fn run(&self, mut func: Function) -> Function {
        let mut subst: HashMap<Value, Value> = HashMap::new();

        for block in &mut func.blocks {
            let mut table: HashMap<Key, Value> = HashMap::new();
            block.insts.retain(|inst| {
                let key = match inst {
                    Inst::Const { value, .. } => Key::Const(*value),
                    Inst::Binary { op, lhs, rhs, .. } => Key::Binary(*op, *lhs, *rhs),
                    Inst::Call { .. } => return true,
                };
                match table.get(&key) {
                    Some(&first) => {
                        subst.insert(inst.dst(), first);
                        false
                    }
                    None => {
                        table.insert(key, inst.dst());
                        true
                    }
                }
            });
        }

        replace_uses(&mut func, &subst);
        func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Terminator};

    #[test]
    fn test_deduplicates_repeated_expression() {
        let mut fb = FunctionBuilder::new("f", 2);
        let a = fb.param(0);
        let b = fb.param(1);
        let x = fb.binary(BinOp::Add, a, b);
        let y = fb.binary(BinOp::Add, a, b);
        let z = fb.binary(BinOp::Mul, x, y);
        fb.ret(z);
        let func = ValueNumbering.run(fb.finish());

        assert_eq!(func.blocks[0].insts.len(), 2);
        assert_eq!(
            func.blocks[0].insts[1],
            Inst::Binary {
                dst: z,
                op: BinOp::Mul,
                lhs: x,
                rhs: x,
            }
        );
    }

    #[test]
    fn test_deduplicates_repeated_constant() {
        let mut fb = FunctionBuilder::new("f", 0);
        let a = fb.iconst(9);
        let b = fb.iconst(9);
        let s = fb.binary(BinOp::Add, a, b);
        fb.ret(s);
        let func = ValueNumbering.run(fb.finish());

        assert_eq!(func.blocks[0].insts.len(), 2);
        assert_eq!(
            func.blocks[0].insts[1],
            Inst::Binary {
                dst: s,
                op: BinOp::Add,
                lhs: a,
                rhs: a,
            }
        );
    }

    #[test]
    fn test_calls_are_not_numbered() {
        let mut fb = FunctionBuilder::new("f", 1);
        let p = fb.param(0);
        let x = fb.call("tick", &[p]);
        let y = fb.call("tick", &[p]);
        let s = fb.binary(BinOp::Add, x, y);
        fb.ret(s);
        let func = ValueNumbering.run(fb.finish());

        let calls = func.blocks[0]
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Call { .. }))
            .count();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_numbering_is_block_local() {
        let mut fb = FunctionBuilder::new("f", 2);
        let a = fb.param(0);
        let b = fb.param(1);
        let x = fb.binary(BinOp::Add, a, b);
        let next = fb.create_block();
        fb.jump(next);
        fb.switch_to_block(next);
        let y = fb.binary(BinOp::Add, a, b);
        fb.ret(y);
        let func = ValueNumbering.run(fb.finish());

        // The second block's computation is kept: numbering does not cross
        // block boundaries.
        assert_eq!(func.blocks[1].insts.len(), 1);
        assert_eq!(func.blocks[1].term, Terminator::Return(y));
        let _ = x;
    }
}
