//! Symbol namespaces with lazy, per-symbol materialization state.
//!
//! A `Dylib` maps symbol names to addresses. A name starts out
//! unmaterialized (backed by a registered but uncompiled module) and is
//! driven to a final address or a sticky error by the first lookup that
//! needs it. All state transitions happen under one mutex; the condvar
//! wakes threads waiting on an in-flight materialization.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

use super::tracker::{ResourceTracker, TrackerId};
use crate::codegen::object::SymbolFlags;
use crate::error::JitError;
use crate::ir::{Module, ModuleId};

/// Fallback definition source consulted when a name has no entry.
///
/// Generators are tried in registration order; the first hit is installed
/// in the namespace so later lookups never re-run the search.
pub trait DefinitionGenerator: Send + Sync {
    fn try_resolve(&self, name: &str) -> Option<u64>;
}

/// Lifecycle of one symbol table entry.
pub(crate) enum MaterializationState {
    /// Defined by a registered module that has not been compiled yet.
    Unmaterialized { module: ModuleId },
    /// A thread is compiling the defining module right now.
    InProgress { owner: ThreadId },
    /// Final, immutable address.
    Materialized { addr: u64 },
    /// Materialization failed; the error is sticky.
    Failed { error: JitError },
}

pub(crate) struct SymbolEntry {
    pub flags: SymbolFlags,
    pub tracker: TrackerId,
    pub state: MaterializationState,
}

/// A module registered for compile-on-demand.
pub(crate) struct PendingModule {
    /// Taken by the thread that starts materialization.
    pub module: Option<Module>,
    pub tracker: TrackerId,
    /// Set when the owning tracker is removed while compilation is in
    /// flight; the finished result must be discarded.
    pub cancelled: bool,
}

pub(crate) struct DylibState {
    pub symbols: HashMap<String, SymbolEntry>,
    pub pending: HashMap<ModuleId, PendingModule>,
    pub generators: Vec<Box<dyn DefinitionGenerator>>,
}

/// A named symbol namespace.
pub struct Dylib {
    name: String,
    default_tracker: TrackerId,
    pub(crate) state: Mutex<DylibState>,
    pub(crate) cond: Condvar,
}

impl Dylib {
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            default_tracker: TrackerId::next(),
            state: Mutex::new(DylibState {
                symbols: HashMap::new(),
                pending: HashMap::new(),
                generators: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn default_tracker_id(&self) -> TrackerId {
        self.default_tracker
    }

    /// The tracker that owns definitions added without an explicit one.
    pub fn default_resource_tracker(self: &Arc<Self>) -> ResourceTracker {
        ResourceTracker::new(self.default_tracker, Arc::downgrade(self))
    }

    /// A fresh tracker for a cohort of definitions to remove together.
    pub fn create_resource_tracker(self: &Arc<Self>) -> ResourceTracker {
        ResourceTracker::new(TrackerId::next(), Arc::downgrade(self))
    }

    /// Append a fallback definition source. Generators only ever fill
    /// gaps: a name with any table entry never reaches them.
    pub fn add_generator(&self, generator: Box<dyn DefinitionGenerator>) {
        self.lock().generators.push(generator);
    }

    /// Define absolute symbols at known addresses.
    ///
    /// A weak definition yields to any existing entry; a strong one
    /// replaces an existing weak entry and collides with a strong one.
    pub fn define(&self, defs: &[(String, u64, SymbolFlags)]) -> Result<(), JitError> {
        let mut state = self.lock();
        for (name, _, flags) in defs {
            if let Some(existing) = state.symbols.get(name) {
                if !flags.weak && !existing.flags.weak {
                    return Err(JitError::DuplicateSymbol {
                        name: name.clone(),
                        dylib: self.name.clone(),
                    });
                }
            }
        }
        for (name, addr, flags) in defs {
            if let Some(existing) = state.symbols.get(name) {
                if flags.weak {
                    continue;
                }
                debug_assert!(existing.flags.weak);
            }
            state.symbols.insert(
                name.clone(),
                SymbolEntry {
                    flags: *flags,
                    tracker: self.default_tracker,
                    state: MaterializationState::Materialized { addr: *addr },
                },
            );
        }
        Ok(())
    }

    /// Register a module for lazy compilation under `tracker`.
    ///
    /// Every exported function gets an unmaterialized entry. If any name
    /// collides the whole module is rejected and nothing is registered.
    pub(crate) fn add_module(&self, module: Module, tracker: TrackerId) -> Result<(), JitError> {
        let mut state = self.lock();
        for symbol in module.defined_symbols() {
            if state.symbols.contains_key(&symbol) {
                return Err(JitError::DuplicateSymbol {
                    name: symbol,
                    dylib: self.name.clone(),
                });
            }
        }

        let id = module.id();
        for symbol in module.defined_symbols() {
            state.symbols.insert(
                symbol,
                SymbolEntry {
                    flags: SymbolFlags::function(true),
                    tracker,
                    state: MaterializationState::Unmaterialized { module: id },
                },
            );
        }
        state.pending.insert(
            id,
            PendingModule {
                module: Some(module),
                tracker,
                cancelled: false,
            },
        );
        Ok(())
    }

    /// Drop every symbol and pending module owned by `id`.
    ///
    /// In-flight materializations are flagged cancelled instead of
    /// removed so the compiling thread can discard its result.
    pub(crate) fn remove_tracker(&self, id: TrackerId) {
        let mut state = self.lock();
        state.symbols.retain(|_, entry| entry.tracker != id);
        for pending in state.pending.values_mut() {
            if pending.tracker == id {
                pending.cancelled = true;
            }
        }
        state
            .pending
            .retain(|_, pending| pending.tracker != id || pending.module.is_none());
        drop(state);
        self.cond.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DylibState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of symbols currently being materialized.
    pub(crate) fn in_flight(&self) -> usize {
        self.lock()
            .symbols
            .values()
            .filter(|entry| matches!(entry.state, MaterializationState::InProgress { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;
    use crate::ir::TargetTriple;

    fn module_with(name: &str) -> Module {
        let mut module = Module::new("m", TargetTriple::host().unwrap());
        let mut f = FunctionBuilder::new(name, 0);
        let v = f.iconst(1);
        f.ret(v);
        module.add_function(f.finish());
        module
    }

    #[test]
    fn test_module_symbols_start_unmaterialized() {
        let dylib = Dylib::new("main");
        dylib
            .add_module(module_with("f"), TrackerId::next())
            .unwrap();
        let state = dylib.lock();
        assert!(matches!(
            state.symbols.get("f").unwrap().state,
            MaterializationState::Unmaterialized { .. }
        ));
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_duplicate_module_symbol_rejected() {
        let dylib = Dylib::new("main");
        dylib
            .add_module(module_with("f"), TrackerId::next())
            .unwrap();
        let err = dylib
            .add_module(module_with("f"), TrackerId::next())
            .unwrap_err();
        assert!(matches!(err, JitError::DuplicateSymbol { name, .. } if name == "f"));
        // the rejected module left no pending entry behind
        assert_eq!(dylib.lock().pending.len(), 1);
    }

    #[test]
    fn test_strong_define_replaces_weak() {
        let dylib = Dylib::new("main");
        let weak = SymbolFlags {
            weak: true,
            ..SymbolFlags::absolute()
        };
        dylib
            .define(&[("x".to_string(), 0x1000, weak)])
            .unwrap();
        dylib
            .define(&[("x".to_string(), 0x2000, SymbolFlags::absolute())])
            .unwrap();
        let state = dylib.lock();
        match state.symbols.get("x").unwrap().state {
            MaterializationState::Materialized { addr } => assert_eq!(addr, 0x2000),
            _ => panic!("expected a materialized entry"),
        }
    }

    #[test]
    fn test_weak_define_yields_to_existing() {
        let dylib = Dylib::new("main");
        dylib
            .define(&[("x".to_string(), 0x1000, SymbolFlags::absolute())])
            .unwrap();
        let weak = SymbolFlags {
            weak: true,
            ..SymbolFlags::absolute()
        };
        dylib.define(&[("x".to_string(), 0x2000, weak)]).unwrap();
        let state = dylib.lock();
        match state.symbols.get("x").unwrap().state {
            MaterializationState::Materialized { addr } => assert_eq!(addr, 0x1000),
            _ => panic!("expected a materialized entry"),
        }
    }

    #[test]
    fn test_strong_over_strong_collides() {
        let dylib = Dylib::new("main");
        dylib
            .define(&[("x".to_string(), 0x1000, SymbolFlags::absolute())])
            .unwrap();
        let err = dylib
            .define(&[("x".to_string(), 0x2000, SymbolFlags::absolute())])
            .unwrap_err();
        assert!(matches!(err, JitError::DuplicateSymbol { .. }));
    }

    #[test]
    fn test_tracker_removal_drops_cohort_only() {
        let dylib = Dylib::new("main");
        let keep = TrackerId::next();
        let drop_id = TrackerId::next();
        dylib.add_module(module_with("keep_me"), keep).unwrap();
        dylib.add_module(module_with("drop_me"), drop_id).unwrap();

        dylib.remove_tracker(drop_id);

        let state = dylib.lock();
        assert!(state.symbols.contains_key("keep_me"));
        assert!(!state.symbols.contains_key("drop_me"));
        assert_eq!(state.pending.len(), 1);
    }
}
