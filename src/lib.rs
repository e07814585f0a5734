//! A compile-on-demand JIT engine for a small SSA-style IR.
//!
//! Modules are registered cheaply and compiled lazily: the first lookup
//! of a symbol optimizes its module, lowers it to x86-64 machine code,
//! links it into executable memory, and installs the addresses of every
//! function the module exports. Subsequent lookups return the installed
//! address; concurrent lookups of the same symbol compile it exactly
//! once.
//!
//! The layers, bottom to top:
//!
//! - [`ir`]: modules, functions, blocks, and a builder for constructing
//!   them, plus a reference evaluator used as a semantic oracle in tests.
//! - [`opt`]: the optimization pipeline (instruction combining,
//!   reassociation, value numbering, CFG simplification), run to a
//!   fixpoint.
//! - [`codegen`]: lowering to x86-64 object code with relocations.
//! - [`link`]: executable memory and relocation patching.
//! - [`session`]: namespaces, resource trackers, and the materialization
//!   state machine.
//! - [`engine`]: the [`JitEngine`] façade tying it all together.

pub mod codegen;
pub mod config;
pub mod engine;
pub mod error;
pub mod ir;
pub mod link;
pub mod opt;
pub mod session;
pub mod stats;

pub use config::EngineConfig;
pub use engine::{Address, EngineState, JitEngine};
pub use error::JitError;
pub use ir::{BinOp, FunctionBuilder, Module, TargetTriple};
pub use session::{DefinitionGenerator, Dylib, HostProcessGenerator, ResourceTracker};
pub use stats::EngineStats;
