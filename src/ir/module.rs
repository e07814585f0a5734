//! IR module, function, and instruction types.
//!
//! The IR is a three-address code over 64-bit signed integers. A function
//! is a list of basic blocks; block 0 is the entry. Virtual registers
//! (`Value`) are function-local; the first `params` registers hold the
//! arguments on entry.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Module identity counter.
static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity token for a submitted module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    fn next() -> Self {
        ModuleId(NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Target CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

/// Target operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Linux,
    MacOs,
}

/// Architecture/OS pair a module is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetTriple {
    pub arch: Arch,
    pub os: Os,
}

impl TargetTriple {
    /// Detect the host target. Returns `None` on platforms the engine
    /// cannot generate code for.
    pub fn host() -> Option<TargetTriple> {
        let arch = if cfg!(target_arch = "x86_64") {
            Arch::X86_64
        } else if cfg!(target_arch = "aarch64") {
            Arch::Aarch64
        } else {
            return None;
        };
        let os = if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else {
            return None;
        };
        Some(TargetTriple { arch, os })
    }
}

impl fmt::Display for TargetTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arch = match self.arch {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        };
        let os = match self.os {
            Os::Linux => "linux",
            Os::MacOs => "macos",
        };
        write!(f, "{}-{}", arch, os)
    }
}

/// A virtual register, local to one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A basic block index within a function. Block 0 is the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary operations over i64. Comparisons yield 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// Operand order does not affect the result.
    pub fn commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Eq | BinOp::Ne
        )
    }

    /// Evaluate the operation on constants. `None` for division by zero
    /// (left to trap at runtime, never folded).
    pub fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        Some(match self {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::Mul => lhs.wrapping_mul(rhs),
            BinOp::Div => {
                if rhs == 0 || (lhs == i64::MIN && rhs == -1) {
                    return None;
                }
                lhs / rhs
            }
            BinOp::And => lhs & rhs,
            BinOp::Or => lhs | rhs,
            BinOp::Xor => lhs ^ rhs,
            BinOp::Eq => (lhs == rhs) as i64,
            BinOp::Ne => (lhs != rhs) as i64,
            BinOp::Lt => (lhs < rhs) as i64,
            BinOp::Le => (lhs <= rhs) as i64,
            BinOp::Gt => (lhs > rhs) as i64,
            BinOp::Ge => (lhs >= rhs) as i64,
        })
    }
}

/// A non-terminator instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// dst = value
    Const { dst: Value, value: i64 },
    /// dst = lhs op rhs
    Binary {
        dst: Value,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },
    /// dst = callee(args...). The callee is a symbol name, resolved at
    /// materialization time (it may live in another module, in another
    /// namespace entry, or in the host process).
    Call {
        dst: Value,
        callee: String,
        args: Vec<Value>,
    },
}

impl Inst {
    pub fn dst(&self) -> Value {
        match self {
            Inst::Const { dst, .. } | Inst::Binary { dst, .. } | Inst::Call { dst, .. } => *dst,
        }
    }
}

/// How a basic block ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Return(Value),
    Jump(BlockId),
    Branch {
        cond: Value,
        then_dest: BlockId,
        else_dest: BlockId,
    },
}

/// A basic block: straight-line instructions plus one terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

/// One function of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    /// Number of parameters; registers `0..params` hold them on entry.
    pub params: u32,
    /// Exported functions become namespace symbols; non-exported ones are
    /// only reachable from within their own module.
    pub exported: bool,
    pub blocks: Vec<Block>,
    /// Total virtual register count, parameters included.
    pub value_count: u32,
}

impl Function {
    /// Names this function calls.
    pub fn callees(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for block in &self.blocks {
            for inst in &block.insts {
                if let Inst::Call { callee, .. } = inst {
                    out.insert(callee.as_str());
                }
            }
        }
        out
    }
}

/// An immutable-once-submitted unit of IR: functions plus identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    name: String,
    id: ModuleId,
    target: TargetTriple,
    functions: Vec<Function>,
}

impl Module {
    /// Create an empty module for the given target.
    pub fn new(name: impl Into<String>, target: TargetTriple) -> Self {
        Self {
            name: name.into(),
            id: ModuleId::next(),
            target,
            functions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn target(&self) -> TargetTriple {
        self.target
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Namespace symbols this module defines (exported functions only).
    pub fn defined_symbols(&self) -> Vec<String> {
        self.functions
            .iter()
            .filter(|f| f.exported)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Names referenced by calls but not defined in this module. These must
    /// resolve through the namespace at link time.
    pub fn external_symbols(&self) -> BTreeSet<String> {
        let defined: BTreeSet<&str> = self.functions.iter().map(|f| f.name.as_str()).collect();
        let mut out = BTreeSet::new();
        for func in &self.functions {
            for callee in func.callees() {
                if !defined.contains(callee) {
                    out.insert(callee.to_string());
                }
            }
        }
        out
    }

    /// Replace the function bodies, keeping name/id/target. Used by the
    /// transform layer, which rewrites bodies but must preserve identity.
    pub fn map_functions(mut self, f: impl FnMut(Function) -> Function) -> Module {
        self.functions = self.functions.into_iter().map(f).collect();
        self
    }
}
