//! The engine façade: one object tying session, namespaces, optimizer,
//! compiler, and linker into a compile-on-demand pipeline.
//!
//! ```no_run
//! use smelt::{EngineConfig, FunctionBuilder, JitEngine, Module, TargetTriple};
//!
//! # fn main() -> Result<(), smelt::JitError> {
//! let engine = JitEngine::create(EngineConfig::default())?;
//!
//! let mut module = Module::new("demo", TargetTriple::host().unwrap());
//! let mut f = FunctionBuilder::new("three", 0);
//! let v = f.iconst(3);
//! f.ret(v);
//! module.add_function(f.finish());
//!
//! engine.add_module(module)?;
//! let three = engine.lookup("three")?;
//! let three: extern "C" fn() -> i64 = unsafe { three.as_fn() };
//! assert_eq!(three(), 3);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::codegen::object::SymbolFlags;
use crate::codegen::{Compiler, HostTarget};
use crate::config::EngineConfig;
use crate::error::JitError;
use crate::ir::Module;
use crate::link::linker::{Linker, SymbolResolver};
use crate::link::LinkedObject;
use crate::opt;
use crate::session::{
    Dylib, ExecutionSession, HostProcessGenerator, Materializer, ResourceTracker,
};
use crate::stats::{Counters, EngineStats};

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    ShuttingDown,
    Terminated,
}

const STATE_READY: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// Absolute address of a JIT-compiled or host symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(u64);

impl Address {
    pub fn new(raw: u64) -> Self {
        Address(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reinterpret the address as a function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches the code at this address (`i64` parameters, `i64` return).
    pub unsafe fn as_fn<F: Copy>(self) -> F {
        assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<u64>());
        unsafe { std::mem::transmute_copy(&self.0) }
    }
}

/// Optimize, compile, and link one module.
struct EngineMaterializer {
    compiler: Compiler,
    optimize: bool,
    counters: Arc<Counters>,
}

impl Materializer for EngineMaterializer {
    fn materialize(
        &self,
        module: Module,
        resolver: &mut SymbolResolver<'_>,
    ) -> Result<LinkedObject, JitError> {
        let module = if self.optimize {
            opt::run_pipeline(module)
        } else {
            module
        };
        let object = self.compiler.compile(&module)?;
        let linked = Linker::link(object, resolver)?;
        self.counters.modules_compiled.fetch_add(1, Ordering::Relaxed);
        Ok(linked)
    }
}

pub struct JitEngine {
    session: Arc<ExecutionSession>,
    main: Arc<Dylib>,
    materializer: EngineMaterializer,
    counters: Arc<Counters>,
    state: AtomicU8,
}

impl JitEngine {
    /// Build an engine for the host target.
    ///
    /// Fails with `Configuration` when the host is not a supported
    /// code generation target.
    pub fn create(config: EngineConfig) -> Result<Self, JitError> {
        if config.main_dylib_name.is_empty() {
            return Err(JitError::Configuration(
                "main namespace needs a non-empty name".to_string(),
            ));
        }
        let target = HostTarget::detect()?;
        let counters = Arc::new(Counters::default());
        let session = Arc::new(ExecutionSession::new(counters.clone()));
        let main = session.create_namespace(&config.main_dylib_name);
        if config.host_symbols {
            main.add_generator(Box::new(HostProcessGenerator));
        }
        tracing::debug!(
            triple = %target.triple(),
            dylib = main.name(),
            optimize = config.optimize,
            "engine ready"
        );
        Ok(Self {
            session,
            main,
            materializer: EngineMaterializer {
                compiler: Compiler::new(target),
                optimize: config.optimize,
                counters: counters.clone(),
            },
            counters,
            state: AtomicU8::new(STATE_READY),
        })
    }

    pub fn state(&self) -> EngineState {
        match self.state.load(Ordering::SeqCst) {
            STATE_READY => EngineState::Ready,
            STATE_SHUTTING_DOWN => EngineState::ShuttingDown,
            _ => EngineState::Terminated,
        }
    }

    fn ensure_ready(&self) -> Result<(), JitError> {
        if self.state.load(Ordering::SeqCst) == STATE_READY {
            Ok(())
        } else {
            Err(JitError::SessionTerminated)
        }
    }

    /// Register a module for compile-on-demand under the default tracker,
    /// returning its handle.
    pub fn add_module(&self, module: Module) -> Result<ResourceTracker, JitError> {
        self.ensure_ready()?;
        let tracker = self.main.default_resource_tracker();
        self.session.add_module(&self.main, module, tracker.id())?;
        Ok(tracker)
    }

    /// Register a module under an explicit tracker so it can be removed
    /// later as part of the tracker's cohort.
    pub fn add_module_with_tracker(
        &self,
        module: Module,
        tracker: &ResourceTracker,
    ) -> Result<(), JitError> {
        self.ensure_ready()?;
        self.session.add_module(&self.main, module, tracker.id())
    }

    /// A fresh tracker on the main namespace.
    pub fn create_resource_tracker(&self) -> ResourceTracker {
        self.main.create_resource_tracker()
    }

    /// Resolve a name, compiling its module first if needed.
    pub fn lookup(&self, name: &str) -> Result<Address, JitError> {
        self.ensure_ready()?;
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        self.session
            .lookup(&self.main, name, &self.materializer)
            .map(Address)
    }

    /// Make host functions or data visible to JIT-compiled code.
    pub fn register_symbols(&self, symbols: &[(&str, Address)]) -> Result<(), JitError> {
        self.ensure_ready()?;
        let defs: Vec<_> = symbols
            .iter()
            .map(|(name, addr)| (name.to_string(), addr.as_u64(), SymbolFlags::absolute()))
            .collect();
        self.main.define(&defs)
    }

    /// The engine's main namespace.
    pub fn main_dylib(&self) -> &Arc<Dylib> {
        &self.main
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Tear the engine down. Exactly one call succeeds; the engine is
    /// unusable afterwards either way. Executable memory stays mapped
    /// until the engine is dropped.
    pub fn end_session(&self) -> Result<(), JitError> {
        if self
            .state
            .compare_exchange(
                STATE_READY,
                STATE_SHUTTING_DOWN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(JitError::SessionTerminated);
        }
        let result = self.session.end_session();
        self.state.store(STATE_TERMINATED, Ordering::SeqCst);
        result
    }
}

impl Drop for JitEngine {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == STATE_READY {
            if let Err(error) = self.end_session() {
                self.session.report_error(&error);
            }
        }
    }
}
