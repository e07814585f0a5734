//! Intermediate representation accepted by the engine.
//!
//! The front-end collaborator lowers its surface language to this IR and
//! submits [`Module`]s to the engine. The engine trusts that submitted
//! modules are well-formed; malformed IR is a programmer error, not a
//! recoverable runtime error.

pub mod builder;
pub mod eval;
pub mod module;

pub use builder::FunctionBuilder;
pub use module::{
    Arch, BinOp, Block, BlockId, Function, Inst, Module, ModuleId, Os, TargetTriple, Terminator,
    Value,
};
