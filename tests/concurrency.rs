//! Concurrent lookup tests: contention must not duplicate compilation,
//! and every waiter must observe the first materialization's outcome.

#![cfg(all(target_arch = "x86_64", any(target_os = "linux", target_os = "macos")))]

use std::sync::Barrier;
use std::thread;

use smelt::{BinOp, EngineConfig, FunctionBuilder, JitEngine, JitError, Module, TargetTriple};

const THREADS: usize = 8;

fn host_module(name: &str) -> Module {
    Module::new(name, TargetTriple::host().unwrap())
}

fn square_module() -> Module {
    let mut module = host_module("square");
    let mut f = FunctionBuilder::new("square", 1);
    let x = f.param(0);
    let sq = f.binary(BinOp::Mul, x, x);
    f.ret(sq);
    module.add_function(f.finish());
    module
}

#[test]
fn test_contended_lookup_compiles_once() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    engine.add_module(square_module()).unwrap();

    let barrier = Barrier::new(THREADS);
    let addresses: Vec<u64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    engine.lookup("square").unwrap().as_u64()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // one address, one compilation, for all eight threads
    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(engine.stats().modules_compiled, 1);
    assert_eq!(engine.stats().lookups, THREADS as u64);

    let square: extern "C" fn(i64) -> i64 = unsafe { engine.lookup("square").unwrap().as_fn() };
    assert_eq!(square(12), 144);
}

#[test]
fn test_waiters_observe_first_failure() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();

    let mut module = host_module("doomed");
    let mut f = FunctionBuilder::new("doomed", 0);
    let zero = f.iconst(0);
    let r = f.call("symbol_that_cannot_exist_0b1c2d", &[zero]);
    f.ret(r);
    module.add_function(f.finish());
    engine.add_module(module).unwrap();

    let barrier = Barrier::new(THREADS);
    let errors: Vec<JitError> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    engine.lookup("doomed").unwrap_err()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for error in &errors {
        assert_eq!(error, &errors[0]);
        assert!(matches!(error, JitError::Unresolved { .. }));
    }
}

#[test]
fn test_independent_modules_materialize_in_parallel() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    for i in 0..THREADS {
        let mut module = host_module(&format!("m{}", i));
        let mut f = FunctionBuilder::new(format!("const_{}", i), 0);
        let c = f.iconst(i as i64);
        f.ret(c);
        module.add_function(f.finish());
        engine.add_module(module).unwrap();
    }

    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        for i in 0..THREADS {
            scope.spawn({
                let engine = &engine;
                let barrier = &barrier;
                move || {
                    barrier.wait();
                    let name = format!("const_{}", i);
                    let f: extern "C" fn() -> i64 =
                        unsafe { engine.lookup(&name).unwrap().as_fn() };
                    assert_eq!(f(), i as i64);
                }
            });
        }
    });

    assert_eq!(engine.stats().modules_compiled, THREADS as u64);
}
