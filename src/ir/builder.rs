//! Convenience builder for constructing IR functions.
//!
//! This is the surface the front-end collaborator (and the test suite)
//! uses to produce well-formed functions. The builder panics on structural
//! misuse (terminating a block twice, finishing with an open block);
//! producing valid IR is the caller's responsibility, per the engine's
//! input contract.

use super::module::{BinOp, Block, BlockId, Function, Inst, Terminator, Value};

/// Builds one [`Function`] block by block.
pub struct FunctionBuilder {
    name: String,
    params: u32,
    exported: bool,
    blocks: Vec<PendingBlock>,
    current: usize,
    value_count: u32,
}

struct PendingBlock {
    insts: Vec<Inst>,
    term: Option<Terminator>,
}

impl FunctionBuilder {
    /// Start a function with `params` parameters. The entry block is
    /// created and selected; parameters are `Value(0)..Value(params)`.
    pub fn new(name: impl Into<String>, params: u32) -> Self {
        Self {
            name: name.into(),
            params,
            exported: true,
            blocks: vec![PendingBlock {
                insts: Vec::new(),
                term: None,
            }],
            current: 0,
            value_count: params,
        }
    }

    /// Mark the function as module-private (not installed as a namespace
    /// symbol).
    pub fn private(mut self) -> Self {
        self.exported = false;
        self
    }

    pub fn param(&self, index: u32) -> Value {
        assert!(index < self.params, "parameter {} out of range", index);
        Value(index)
    }

    pub fn create_block(&mut self) -> BlockId {
        self.blocks.push(PendingBlock {
            insts: Vec::new(),
            term: None,
        });
        BlockId((self.blocks.len() - 1) as u32)
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        assert!(block.index() < self.blocks.len(), "unknown block");
        self.current = block.index();
    }

    fn fresh_value(&mut self) -> Value {
        let v = Value(self.value_count);
        self.value_count += 1;
        v
    }

    fn push(&mut self, inst: Inst) {
        let block = &mut self.blocks[self.current];
        assert!(block.term.is_none(), "appending to a terminated block");
        block.insts.push(inst);
    }

    pub fn iconst(&mut self, value: i64) -> Value {
        let dst = self.fresh_value();
        self.push(Inst::Const { dst, value });
        dst
    }

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        let dst = self.fresh_value();
        self.push(Inst::Binary { dst, op, lhs, rhs });
        dst
    }

    pub fn call(&mut self, callee: impl Into<String>, args: &[Value]) -> Value {
        let dst = self.fresh_value();
        self.push(Inst::Call {
            dst,
            callee: callee.into(),
            args: args.to_vec(),
        });
        dst
    }

    fn terminate(&mut self, term: Terminator) {
        let block = &mut self.blocks[self.current];
        assert!(block.term.is_none(), "block already terminated");
        block.term = Some(term);
    }

    pub fn ret(&mut self, value: Value) {
        self.terminate(Terminator::Return(value));
    }

    pub fn jump(&mut self, dest: BlockId) {
        self.terminate(Terminator::Jump(dest));
    }

    pub fn branch(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_dest,
            else_dest,
        });
    }

    /// Finish the function. Panics if any block lacks a terminator.
    pub fn finish(self) -> Function {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, b)| Block {
                insts: b.insts,
                term: b.term.unwrap_or_else(|| panic!("block {} not terminated", i)),
            })
            .collect();
        Function {
            name: self.name,
            params: self.params,
            exported: self.exported,
            blocks,
            value_count: self.value_count,
        }
    }
}
