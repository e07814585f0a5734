//! Relocation resolution and symbol installation.
//!
//! The linker copies an object's code into fresh executable memory,
//! patches every relocation, seals the pages read+execute, and reports
//! the final address of each defined symbol. External references go
//! through a resolver callback supplied by the execution session; the
//! callback may itself trigger materialization of other modules.

use super::memory::ExecutableMemory;
use crate::codegen::object::{ObjectCode, RelocKind, SymbolFlags};
use crate::error::JitError;

/// Resolver for names the object does not define itself.
pub type SymbolResolver<'a> = dyn FnMut(&str) -> Result<u64, JitError> + 'a;

/// A finalized object: sealed code plus the addresses of its symbols.
pub struct LinkedObject {
    /// Sealed mapping. `None` for objects with no code (empty modules).
    pub memory: Option<ExecutableMemory>,
    /// (name, absolute address, flags) for every defined symbol.
    pub symbols: Vec<(String, u64, SymbolFlags)>,
}

pub struct Linker;

impl Linker {
    /// Link one object. On error the object's code is discarded and its
    /// symbols never become available.
    pub fn link(object: ObjectCode, resolve: &mut SymbolResolver) -> Result<LinkedObject, JitError> {
        if object.code.is_empty() {
            return Ok(LinkedObject {
                memory: None,
                symbols: Vec::new(),
            });
        }

        let mut memory = ExecutableMemory::new(object.code.len())?;
        memory.write(0, &object.code)?;
        let base = memory.base();

        for reloc in &object.relocations {
            let target = match object.local_symbol(&reloc.symbol) {
                Some(offset) => base + offset as u64,
                None => resolve(&reloc.symbol)?,
            };
            tracing::trace!(
                symbol = %reloc.symbol,
                kind = ?reloc.kind,
                site = base + reloc.offset as u64,
                target,
                "patching relocation"
            );
            match reloc.kind {
                RelocKind::CallPcRel32 => {
                    let site_end = base + reloc.offset as u64 + 4;
                    let rel = target.wrapping_sub(site_end) as i64;
                    let rel32 = i32::try_from(rel).map_err(|_| {
                        JitError::Link(format!(
                            "pc-relative target '{}' out of range",
                            reloc.symbol
                        ))
                    })?;
                    memory.write(reloc.offset, &rel32.to_le_bytes())?;
                }
                RelocKind::Abs64 => {
                    memory.write(reloc.offset, &target.to_le_bytes())?;
                }
            }
        }

        memory.seal()?;

        let symbols = object
            .symbols
            .iter()
            .map(|def| (def.name.clone(), base + def.offset as u64, def.flags))
            .collect();

        Ok(LinkedObject {
            memory: Some(memory),
            symbols,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::object::{Relocation, SymbolDef};
    use crate::ir::{Module, TargetTriple};

    fn object_with(code: Vec<u8>, symbols: Vec<SymbolDef>, relocations: Vec<Relocation>) -> ObjectCode {
        // A module is only created here to obtain a fresh id.
        let module = Module::new("t", TargetTriple::host().unwrap());
        ObjectCode {
            module_name: "t".to_string(),
            module_id: module.id(),
            code,
            symbols,
            relocations,
        }
    }

    #[test]
    fn test_abs64_patch_writes_resolved_address() {
        // mov r11, imm64 ; ret
        let mut code = vec![0x49, 0xBB];
        code.extend_from_slice(&[0; 8]);
        code.push(0xC3);
        let object = object_with(
            code,
            vec![SymbolDef {
                name: "f".to_string(),
                offset: 0,
                flags: SymbolFlags::function(true),
            }],
            vec![Relocation {
                offset: 2,
                kind: RelocKind::Abs64,
                symbol: "ext".to_string(),
            }],
        );

        let linked = Linker::link(object, &mut |name| {
            assert_eq!(name, "ext");
            Ok(0x1122_3344_5566_7788)
        })
        .unwrap();

        let memory = linked.memory.unwrap();
        let mut patched = [0u8; 8];
        memory.read(2, &mut patched);
        assert_eq!(u64::from_le_bytes(patched), 0x1122_3344_5566_7788);
        assert!(memory.is_sealed());
    }

    #[test]
    fn test_local_pcrel_patch_is_relative() {
        // call rel32 ; ret ; <16-aligned> target: ret
        let mut code = vec![0xE8, 0, 0, 0, 0, 0xC3];
        while code.len() < 16 {
            code.push(0x90);
        }
        code.push(0xC3); // offset 16
        let object = object_with(
            code,
            vec![
                SymbolDef {
                    name: "caller".to_string(),
                    offset: 0,
                    flags: SymbolFlags::function(true),
                },
                SymbolDef {
                    name: "callee".to_string(),
                    offset: 16,
                    flags: SymbolFlags::function(false),
                },
            ],
            vec![Relocation {
                offset: 1,
                kind: RelocKind::CallPcRel32,
                symbol: "callee".to_string(),
            }],
        );

        let linked = Linker::link(object, &mut |name| {
            panic!("local symbol '{}' reached the resolver", name)
        })
        .unwrap();

        let memory = linked.memory.unwrap();
        let mut field = [0u8; 4];
        memory.read(1, &mut field);
        // target 16, field end at 5 -> +11
        assert_eq!(i32::from_le_bytes(field), 11);
    }

    #[test]
    fn test_resolver_failure_fails_the_link() {
        let mut code = vec![0x49, 0xBB];
        code.extend_from_slice(&[0; 8]);
        code.push(0xC3);
        let object = object_with(
            code,
            vec![],
            vec![Relocation {
                offset: 2,
                kind: RelocKind::Abs64,
                symbol: "missing".to_string(),
            }],
        );

        let err = Linker::link(object, &mut |name| Err(JitError::unresolved(name)))
            .err()
            .unwrap();
        assert!(matches!(err, JitError::Unresolved { .. }));
    }

    #[test]
    fn test_empty_object_links_to_nothing() {
        let object = object_with(vec![], vec![], vec![]);
        let linked = Linker::link(object, &mut |_| unreachable!()).unwrap();
        assert!(linked.memory.is_none());
        assert!(linked.symbols.is_empty());
    }

    #[test]
    fn test_symbol_addresses_offset_from_base() {
        let code = vec![0xC3; 32];
        let object = object_with(
            code,
            vec![
                SymbolDef {
                    name: "a".to_string(),
                    offset: 0,
                    flags: SymbolFlags::function(true),
                },
                SymbolDef {
                    name: "b".to_string(),
                    offset: 16,
                    flags: SymbolFlags::function(true),
                },
            ],
            vec![],
        );
        let linked = Linker::link(object, &mut |_| unreachable!()).unwrap();
        let base = linked.memory.as_ref().unwrap().base();
        assert_eq!(linked.symbols[0].1, base);
        assert_eq!(linked.symbols[1].1, base + 16);
    }
}
