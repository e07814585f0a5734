//! Reference evaluator for IR modules.
//!
//! Executes a function directly over the IR, without compilation. The
//! optimizer tests use this as the semantic oracle: a transformed module
//! must produce the same outputs as the original for the same inputs.
//! Calls resolve within the module only; external calls are an error here.

use super::module::{Function, Inst, Module, Terminator};

/// Upper bound on executed instructions, so a malformed loop fails instead
/// of hanging the test suite.
const FUEL: u64 = 1 << 22;

/// Evaluate `module::name(args)`.
pub fn call(module: &Module, name: &str, args: &[i64]) -> Result<i64, String> {
    let mut fuel = FUEL;
    call_with_fuel(module, name, args, &mut fuel)
}

fn call_with_fuel(
    module: &Module,
    name: &str,
    args: &[i64],
    fuel: &mut u64,
) -> Result<i64, String> {
    let func = module
        .function(name)
        .ok_or_else(|| format!("function '{}' not defined in module '{}'", name, module.name()))?;
    if args.len() != func.params as usize {
        return Err(format!(
            "'{}' expects {} arguments, got {}",
            name,
            func.params,
            args.len()
        ));
    }
    eval_function(module, func, args, fuel)
}

fn eval_function(
    module: &Module,
    func: &Function,
    args: &[i64],
    fuel: &mut u64,
) -> Result<i64, String> {
    let mut regs = vec![0i64; func.value_count as usize];
    regs[..args.len()].copy_from_slice(args);

    let mut block = &func.blocks[0];
    loop {
        for inst in &block.insts {
            *fuel = fuel
                .checked_sub(1)
                .ok_or_else(|| "evaluation fuel exhausted".to_string())?;
            match inst {
                Inst::Const { dst, value } => regs[dst.index()] = *value,
                Inst::Binary { dst, op, lhs, rhs } => {
                    let result = op
                        .apply(regs[lhs.index()], regs[rhs.index()])
                        .ok_or_else(|| "division by zero".to_string())?;
                    regs[dst.index()] = result;
                }
                Inst::Call { dst, callee, args } => {
                    let vals: Vec<i64> = args.iter().map(|v| regs[v.index()]).collect();
                    regs[dst.index()] = call_with_fuel(module, callee, &vals, fuel)?;
                }
            }
        }
        match &block.term {
            Terminator::Return(v) => return Ok(regs[v.index()]),
            Terminator::Jump(dest) => block = &func.blocks[dest.index()],
            Terminator::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                let dest = if regs[cond.index()] != 0 {
                    then_dest
                } else {
                    else_dest
                };
                block = &func.blocks[dest.index()];
            }
        }
        *fuel = fuel
            .checked_sub(1)
            .ok_or_else(|| "evaluation fuel exhausted".to_string())?;
    }
}
