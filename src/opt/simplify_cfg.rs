//! Control-flow simplification: branch folding, jump threading, block
//! merging, and unreachable-block removal.
//!
//! Runs last in the pipeline so it can clean up blocks the earlier passes
//! emptied out.

use std::collections::HashMap;

use super::{collect_consts, Pass};
use crate::ir::{Block, BlockId, Function, Terminator};

pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn run(&self, mut func: Function) -> Function {
        loop {
            let mut changed = fold_branches(&mut func);
            changed |= thread_jumps(&mut func);
            changed |= merge_blocks(&mut func);
            changed |= drop_unreachable(&mut func);
            if !changed {
                return func;
            }
        }
    }
}

/// Branches on a known constant, or with identical destinations, become
/// unconditional jumps.
fn fold_branches(func: &mut Function) -> bool {
    let consts = collect_consts(func);
    let mut changed = false;
    for block in &mut func.blocks {
        if let Terminator::Branch {
            cond,
            then_dest,
            else_dest,
        } = block.term
        {
            if then_dest == else_dest {
                block.term = Terminator::Jump(then_dest);
                changed = true;
            } else if let Some(&c) = consts.get(&cond) {
                let dest = if c != 0 { then_dest } else { else_dest };
                block.term = Terminator::Jump(dest);
                changed = true;
            }
        }
    }
    changed
}

/// Retarget edges that pass through empty forwarding blocks (no
/// instructions, unconditional jump) straight to the final destination.
fn thread_jumps(func: &mut Function) -> bool {
    let forward: HashMap<BlockId, BlockId> = func
        .blocks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| match b.term {
            Terminator::Jump(dest) if b.insts.is_empty() && dest.index() != i => {
                Some((BlockId(i as u32), dest))
            }
            _ => None,
        })
        .collect();
    if forward.is_empty() {
        return false;
    }

    let resolve = |mut id: BlockId| {
        // Guard against forwarding cycles (all-empty loops).
        let mut hops = 0;
        while let Some(&next) = forward.get(&id) {
            hops += 1;
            if hops > forward.len() {
                break;
            }
            id = next;
        }
        id
    };

    let mut changed = false;
    for block in &mut func.blocks {
        match &mut block.term {
            Terminator::Return(_) => {}
            Terminator::Jump(dest) => {
                let target = resolve(*dest);
                if target != *dest {
                    *dest = target;
                    changed = true;
                }
            }
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                for dest in [then_dest, else_dest] {
                    let target = resolve(*dest);
                    if target != *dest {
                        *dest = target;
                        changed = true;
                    }
                }
            }
        }
    }
    changed
}

/// Count incoming edges per block; the entry block has an implicit one.
fn predecessor_counts(func: &Function) -> Vec<usize> {
    let mut counts = vec![0usize; func.blocks.len()];
    counts[0] += 1;
    for block in &func.blocks {
        match block.term {
            Terminator::Return(_) => {}
            Terminator::Jump(dest) => counts[dest.index()] += 1,
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                counts[then_dest.index()] += 1;
                counts[else_dest.index()] += 1;
            }
        }
    }
    counts
}

/// Splice single-predecessor jump targets into their predecessor. One
/// merge per call; the driver loop runs to a fixpoint.
fn merge_blocks(func: &mut Function) -> bool {
    let counts = predecessor_counts(func);
    let candidate = func.blocks.iter().enumerate().find_map(|(i, b)| match b.term {
        Terminator::Jump(dest)
            if dest.index() != i && dest.index() != 0 && counts[dest.index()] == 1 =>
        {
            Some((i, dest.index()))
        }
        _ => None,
    });
    let Some((pred, succ)) = candidate else {
        return false;
    };

    let succ_block = std::mem::replace(
        &mut func.blocks[succ],
        Block {
            insts: Vec::new(),
            term: Terminator::Jump(BlockId(succ as u32)),
        },
    );
    let pred_block = &mut func.blocks[pred];
    pred_block.insts.extend(succ_block.insts);
    pred_block.term = succ_block.term;
    // The hollowed-out successor is now unreachable; drop_unreachable
    // collects it.
    true
}

/// Remove blocks unreachable from the entry and renumber the rest.
fn drop_unreachable(func: &mut Function) -> bool {
    let total = func.blocks.len();
    let mut reachable = vec![false; total];
    let mut stack = vec![0usize];
    while let Some(i) = stack.pop() {
        if reachable[i] {
            continue;
        }
        reachable[i] = true;
        match func.blocks[i].term {
            Terminator::Return(_) => {}
            Terminator::Jump(dest) => stack.push(dest.index()),
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                stack.push(then_dest.index());
                stack.push(else_dest.index());
            }
        }
    }
    if reachable.iter().all(|&r| r) {
        return false;
    }

    let mut remap = vec![BlockId(0); total];
    let mut next = 0u32;
    for i in 0..total {
        if reachable[i] {
            remap[i] = BlockId(next);
            next += 1;
        }
    }

    let mut kept = Vec::with_capacity(next as usize);
    for (i, block) in std::mem::take(&mut func.blocks).into_iter().enumerate() {
        if reachable[i] {
            kept.push(block);
        }
    }
    for block in &mut kept {
        match &mut block.term {
            Terminator::Return(_) => {}
            Terminator::Jump(dest) => *dest = remap[dest.index()],
            Terminator::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                *then_dest = remap[then_dest.index()];
                *else_dest = remap[else_dest.index()];
            }
        }
    }
    func.blocks = kept;
    true
}
