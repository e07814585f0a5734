//! Object linking layer: executable memory and relocation patching.

pub mod linker;
pub mod memory;

pub use linker::{LinkedObject, Linker};
pub use memory::ExecutableMemory;
