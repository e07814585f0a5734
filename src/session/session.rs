//! The execution session: materialization driver and resource root.
//!
//! The session owns every namespace and every sealed block of executable
//! memory. Lookups drive symbols through their state machine: the first
//! thread to need an unmaterialized symbol compiles its module (outside
//! the namespace lock), installs the results, and wakes any waiters.
//! Compilation happens at most once per module regardless of contention.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use super::dylib::{Dylib, DylibState, MaterializationState, SymbolEntry};
use super::tracker::TrackerId;
use crate::codegen::object::SymbolFlags;
use crate::error::JitError;
use crate::ir::{Module, ModuleId};
use crate::link::linker::SymbolResolver;
use crate::link::{ExecutableMemory, LinkedObject};
use crate::stats::Counters;

/// Compiles a module into linked code. The resolver is consulted for
/// names the module references but does not define; it may re-enter the
/// session and trigger further materializations.
pub trait Materializer: Sync {
    fn materialize(
        &self,
        module: Module,
        resolver: &mut SymbolResolver<'_>,
    ) -> Result<LinkedObject, JitError>;
}

type ErrorReporter = dyn Fn(&JitError) + Send + Sync;

pub struct ExecutionSession {
    dylibs: Mutex<Vec<Arc<Dylib>>>,
    terminated: AtomicBool,
    counters: Arc<Counters>,
    /// Sealed code blocks, append-only. Unmapped only when the session
    /// itself is dropped; JIT'd code may be executing until then.
    code: Mutex<Vec<ExecutableMemory>>,
    reporter: Mutex<Option<Box<ErrorReporter>>>,
}

impl ExecutionSession {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            dylibs: Mutex::new(Vec::new()),
            terminated: AtomicBool::new(false),
            counters,
            code: Mutex::new(Vec::new()),
            reporter: Mutex::new(None),
        }
    }

    /// Create and register a named namespace.
    pub fn create_namespace(&self, name: &str) -> Arc<Dylib> {
        let dylib = Dylib::new(name);
        lock(&self.dylibs).push(dylib.clone());
        dylib
    }

    pub fn namespace(&self, name: &str) -> Option<Arc<Dylib>> {
        lock(&self.dylibs).iter().find(|d| d.name() == name).cloned()
    }

    /// Replace the default error reporter (which logs via `tracing`).
    pub fn set_error_reporter(&self, reporter: Box<ErrorReporter>) {
        *lock(&self.reporter) = Some(reporter);
    }

    /// Route an error that has no caller to return to.
    pub fn report_error(&self, error: &JitError) {
        match lock(&self.reporter).as_ref() {
            Some(reporter) => reporter(error),
            None => tracing::error!(%error, "session error"),
        }
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Register a module for compile-on-demand in `dylib`.
    pub fn add_module(
        &self,
        dylib: &Dylib,
        module: Module,
        tracker: TrackerId,
    ) -> Result<(), JitError> {
        if self.terminated() {
            return Err(JitError::SessionTerminated);
        }
        dylib.add_module(module, tracker)?;
        self.counters.modules_added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Resolve `name` in `dylib`, materializing its defining module if
    /// necessary.
    pub fn lookup(
        &self,
        dylib: &Arc<Dylib>,
        name: &str,
        materializer: &dyn Materializer,
    ) -> Result<u64, JitError> {
        self.resolve(dylib, name, materializer)
    }

    /// Search namespaces in order. The first namespace that knows the
    /// name decides the outcome, even when its materialization failed.
    pub fn lookup_ordered(
        &self,
        dylibs: &[&Arc<Dylib>],
        name: &str,
        materializer: &dyn Materializer,
    ) -> Result<u64, JitError> {
        for dylib in dylibs {
            match self.resolve(dylib, name, materializer) {
                Err(JitError::Unresolved { .. }) => continue,
                outcome => return outcome,
            }
        }
        Err(JitError::unresolved(name))
    }

    fn resolve(
        &self,
        dylib: &Arc<Dylib>,
        name: &str,
        materializer: &dyn Materializer,
    ) -> Result<u64, JitError> {
        let me = thread::current().id();
        let mut state = dylib.lock();
        let module_id = loop {
            if self.terminated() {
                return Err(JitError::SessionTerminated);
            }
            match state.symbols.get(name) {
                Some(entry) => match &entry.state {
                    MaterializationState::Materialized { addr } => return Ok(*addr),
                    MaterializationState::Failed { error } => return Err(error.clone()),
                    MaterializationState::InProgress { owner } => {
                        // Re-entry from our own materialization would
                        // deadlock; treat the dependency cycle as
                        // unresolvable.
                        if *owner == me {
                            return Err(JitError::unresolved(name));
                        }
                        state = wait(dylib, state);
                    }
                    MaterializationState::Unmaterialized { module } => break *module,
                },
                None => return self.try_generators(dylib, name, state),
            }
        };
        self.materialize(dylib, name, module_id, state, materializer)
    }

    /// Consult the namespace's generators for a name with no entry.
    fn try_generators(
        &self,
        dylib: &Dylib,
        name: &str,
        mut state: MutexGuard<'_, DylibState>,
    ) -> Result<u64, JitError> {
        let hit = state
            .generators
            .iter()
            .find_map(|generator| generator.try_resolve(name));
        match hit {
            Some(addr) => {
                self.counters.generator_hits.fetch_add(1, Ordering::Relaxed);
                // Install so later lookups skip the generator search.
                state.symbols.insert(
                    name.to_string(),
                    SymbolEntry {
                        flags: SymbolFlags::absolute(),
                        tracker: dylib.default_tracker_id(),
                        state: MaterializationState::Materialized { addr },
                    },
                );
                Ok(addr)
            }
            None => Err(JitError::unresolved(name)),
        }
    }

    /// Compile and link the pending module behind `name`, then install
    /// every symbol it exports.
    fn materialize(
        &self,
        dylib: &Arc<Dylib>,
        name: &str,
        id: ModuleId,
        mut state: MutexGuard<'_, DylibState>,
        materializer: &dyn Materializer,
    ) -> Result<u64, JitError> {
        let module = match state.pending.get_mut(&id).and_then(|p| p.module.take()) {
            Some(module) => module,
            // A tracker removal raced us between observing the entry and
            // claiming the module.
            None => return Err(JitError::unresolved(name)),
        };
        let me = thread::current().id();
        let owned = module.defined_symbols();
        for symbol in &owned {
            if let Some(entry) = state.symbols.get_mut(symbol) {
                entry.state = MaterializationState::InProgress { owner: me };
            }
        }
        drop(state);

        tracing::debug!(module = %module.name(), symbol = name, "materializing");
        let result = materializer.materialize(module, &mut |external: &str| {
            self.resolve(dylib, external, materializer)
        });

        let mut state = dylib.lock();
        let cancelled = match state.pending.remove(&id) {
            Some(pending) => pending.cancelled,
            None => true,
        };

        match result {
            Ok(linked) if !cancelled && !self.terminated() => {
                if let Some(memory) = linked.memory {
                    lock(&self.code).push(memory);
                }
                for (symbol, addr, flags) in linked.symbols {
                    if !flags.exported {
                        continue;
                    }
                    if let Some(entry) = state.symbols.get_mut(&symbol) {
                        entry.state = MaterializationState::Materialized { addr };
                    }
                }
                let resolved = match state.symbols.get(name).map(|e| &e.state) {
                    Some(MaterializationState::Materialized { addr }) => Ok(*addr),
                    _ => Err(JitError::unresolved(name)),
                };
                drop(state);
                dylib.cond.notify_all();
                resolved
            }
            Ok(_) => {
                // Result discarded: the cohort was removed or the session
                // ended while we were compiling.
                drop(state);
                dylib.cond.notify_all();
                if self.terminated() {
                    Err(JitError::SessionTerminated)
                } else {
                    Err(JitError::unresolved(name))
                }
            }
            Err(error) => {
                for symbol in &owned {
                    if let Some(entry) = state.symbols.get_mut(symbol) {
                        if matches!(
                            entry.state,
                            MaterializationState::InProgress { owner } if owner == me
                        ) {
                            entry.state = MaterializationState::Failed {
                                error: error.clone(),
                            };
                        }
                    }
                }
                drop(state);
                dylib.cond.notify_all();
                Err(error)
            }
        }
    }

    /// Tear the session down. Fails with `Teardown` if materializations
    /// are still in flight; the session is terminated either way and
    /// every subsequent operation reports `SessionTerminated`.
    pub fn end_session(&self) -> Result<(), JitError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Err(JitError::SessionTerminated);
        }
        let dylibs = lock(&self.dylibs).clone();
        let mut in_flight = 0;
        for dylib in &dylibs {
            in_flight += dylib.in_flight();
            // Wake waiters so they observe termination.
            dylib.cond.notify_all();
        }
        if in_flight > 0 {
            return Err(JitError::Teardown(format!(
                "{} materializations still in flight",
                in_flight
            )));
        }
        tracing::debug!("session ended");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wait<'a>(dylib: &'a Dylib, guard: MutexGuard<'a, DylibState>) -> MutexGuard<'a, DylibState> {
    match dylib.cond.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
