//! Compile layer: lowers IR modules to native object code.
//!
//! The compiler is stateless apart from read-only target configuration,
//! so independent modules can be compiled concurrently.

pub mod codebuf;
pub mod compiler;
pub mod object;
pub mod target;
pub mod x86_64;

pub use compiler::Compiler;
pub use object::{ObjectCode, RelocKind, Relocation, SymbolDef, SymbolFlags};
pub use target::HostTarget;
