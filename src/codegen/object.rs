//! Native object code produced by the compile layer.
//!
//! An `ObjectCode` is transient: the linking layer consumes it, copies
//! the bytes into executable memory, patches the relocations, and installs
//! the defined symbols. Nothing retains it afterwards.

use crate::ir::ModuleId;

/// Attributes of a defined symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolFlags {
    /// Installed into the owning namespace and visible to lookups.
    pub exported: bool,
    /// Address may be invoked as a function.
    pub callable: bool,
    /// May be silently superseded by a strong definition.
    pub weak: bool,
}

impl SymbolFlags {
    /// Flags for an ordinary JIT-compiled function.
    pub fn function(exported: bool) -> Self {
        Self {
            exported,
            callable: true,
            weak: false,
        }
    }

    /// Flags for a caller-supplied absolute symbol.
    pub fn absolute() -> Self {
        Self {
            exported: true,
            callable: true,
            weak: false,
        }
    }
}

/// A symbol defined by an object, at a byte offset into its code.
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub name: String,
    pub offset: usize,
    pub flags: SymbolFlags,
}

/// How a relocation site is patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit displacement from the end of the field (CALL rel32).
    /// Only used for targets within the same object.
    CallPcRel32,
    /// Absolute 64-bit address (MOV r64, imm64 immediate field).
    Abs64,
}

/// A patch to apply once the referenced symbol's address is known.
#[derive(Debug, Clone)]
pub struct Relocation {
    /// Byte offset of the field to patch.
    pub offset: usize,
    pub kind: RelocKind,
    /// Name of the referenced symbol.
    pub symbol: String,
}

/// Compiled native code for one module.
#[derive(Debug)]
pub struct ObjectCode {
    pub module_name: String,
    pub module_id: ModuleId,
    pub code: Vec<u8>,
    pub symbols: Vec<SymbolDef>,
    pub relocations: Vec<Relocation>,
}

impl ObjectCode {
    /// Offset of a symbol defined by this object.
    pub fn local_symbol(&self, name: &str) -> Option<usize> {
        self.symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.offset)
    }
}
