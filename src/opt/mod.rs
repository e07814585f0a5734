//! Transform layer: the fixed optimization pass pipeline.
//!
//! Pass order matters: reassociation runs before value numbering so that
//! commutative expressions are in canonical operand order when the
//! numbering looks for recognizably-equal instructions, and control-flow
//! simplification runs last to clean up blocks emptied by the earlier
//! passes. The whole stage is advisory: skipping it still yields correct
//! code.
//!
//! Every pass is a total function over a well-formed function body. The
//! driver reapplies the pipeline until the module stops changing, so a
//! second invocation on an already-optimized module is a no-op.

mod combine;
mod gvn;
mod reassociate;
mod simplify_cfg;

use std::collections::HashMap;

use crate::ir::{Function, Inst, Module, Terminator, Value};

pub use combine::Combine;
pub use gvn::ValueNumbering;
pub use reassociate::Reassociate;
pub use simplify_cfg::SimplifyCfg;

/// A single analysis-preserving rewrite over one function body.
pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&self, func: Function) -> Function;
}

/// The fixed pipeline, in execution order.
pub fn pipeline() -> Vec<Box<dyn Pass>> {
    vec![
        Box::new(Combine),
        Box::new(Reassociate),
        Box::new(ValueNumbering),
        Box::new(SimplifyCfg),
    ]
}

/// Iteration cap for the fixpoint driver. The passes only shrink or
/// canonicalize, so in practice two or three rounds suffice.
const MAX_ROUNDS: usize = 32;

/// Run the pipeline over every function of the module, to a fixpoint.
pub fn run_pipeline(module: Module) -> Module {
    let passes = pipeline();
    let mut current = module;
    for round in 0..MAX_ROUNDS {
        let before = current.clone();
        current = current.map_functions(|f| passes.iter().fold(f, |f, p| p.run(f)));
        if current == before {
            tracing::trace!(rounds = round + 1, module = current.name(), "optimizer fixpoint");
            break;
        }
    }
    current
}

/// Constants defined anywhere in the function. Sound because the builder
/// assigns each instruction a fresh destination register.
pub(crate) fn collect_consts(func: &Function) -> HashMap<Value, i64> {
    let mut consts = HashMap::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let Inst::Const { dst, value } = inst {
                consts.insert(*dst, *value);
            }
        }
    }
    consts
}

/// Rewrite every operand through `map`, following chains (a -> b -> c).
pub(crate) fn replace_uses(func: &mut Function, map: &HashMap<Value, Value>) {
    if map.is_empty() {
        return;
    }
    let resolve = |mut v: Value| {
        // Chains are short; cycles cannot occur since each entry points at
        // an older value.
        while let Some(&next) = map.get(&v) {
            if next == v {
                break;
            }
            v = next;
        }
        v
    };
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            match inst {
                Inst::Const { .. } => {}
                Inst::Binary { lhs, rhs, .. } => {
                    *lhs = resolve(*lhs);
                    *rhs = resolve(*rhs);
                }
                Inst::Call { args, .. } => {
                    for arg in args {
                        *arg = resolve(*arg);
                    }
                }
            }
        }
        match &mut block.term {
            Terminator::Return(v) => *v = resolve(*v),
            Terminator::Jump(_) => {}
            Terminator::Branch { cond, .. } => *cond = resolve(*cond),
        }
    }
}
