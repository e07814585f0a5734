//! End-to-end tests: build IR, hand it to the engine, call the compiled
//! code as native functions.

#![cfg(all(target_arch = "x86_64", any(target_os = "linux", target_os = "macos")))]

use smelt::ir::eval;
use smelt::{
    Address, BinOp, EngineConfig, FunctionBuilder, JitEngine, JitError, Module, TargetTriple,
};

fn host_module(name: &str) -> Module {
    Module::new(name, TargetTriple::host().unwrap())
}

/// add(a, b) = a + b
fn add_module() -> Module {
    let mut module = host_module("adder");
    let mut f = FunctionBuilder::new("add", 2);
    let a = f.param(0);
    let b = f.param(1);
    let sum = f.binary(BinOp::Add, a, b);
    f.ret(sum);
    module.add_function(f.finish());
    module
}

/// add_twice(a, b) = add(add(a, b), b), with add in another module.
fn add_twice_module() -> Module {
    let mut module = host_module("adder_client");
    let mut f = FunctionBuilder::new("add_twice", 2);
    let a = f.param(0);
    let b = f.param(1);
    let once = f.call("add", &[a, b]);
    let twice = f.call("add", &[once, b]);
    f.ret(twice);
    module.add_function(f.finish());
    module
}

/// fib(n), recursive, with a branch on n < 2.
fn fib_module() -> Module {
    let mut module = host_module("fib");
    let mut f = FunctionBuilder::new("fib", 1);
    let n = f.param(0);
    let two = f.iconst(2);
    let small = f.binary(BinOp::Lt, n, two);
    let base = f.create_block();
    let rec = f.create_block();
    f.branch(small, base, rec);

    f.switch_to_block(base);
    f.ret(n);

    f.switch_to_block(rec);
    let one = f.iconst(1);
    let n1 = f.binary(BinOp::Sub, n, one);
    let a = f.call("fib", &[n1]);
    let n2 = f.binary(BinOp::Sub, n, two);
    let b = f.call("fib", &[n2]);
    let sum = f.binary(BinOp::Add, a, b);
    f.ret(sum);

    module.add_function(f.finish());
    module
}

#[test]
fn test_compiles_and_runs_add() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    engine.add_module(add_module()).unwrap();

    let add = engine.lookup("add").unwrap();
    let add: extern "C" fn(i64, i64) -> i64 = unsafe { add.as_fn() };
    assert_eq!(add(2, 3), 5);
    assert_eq!(add(-10, 4), -6);
}

#[test]
fn test_cross_module_call() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    engine.add_module(add_module()).unwrap();
    engine.add_module(add_twice_module()).unwrap();

    // looking up add_twice pulls in the adder module transitively
    let f = engine.lookup("add_twice").unwrap();
    let f: extern "C" fn(i64, i64) -> i64 = unsafe { f.as_fn() };
    assert_eq!(f(2, 3), 8);

    let stats = engine.stats();
    assert_eq!(stats.modules_added, 2);
    assert_eq!(stats.modules_compiled, 2);
}

#[test]
fn test_recursion_branches_and_comparisons() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    let module = fib_module();
    let expected = eval::call(&module, "fib", &[10]).unwrap();
    engine.add_module(module).unwrap();

    let fib = engine.lookup("fib").unwrap();
    let fib: extern "C" fn(i64) -> i64 = unsafe { fib.as_fn() };
    assert_eq!(fib(10), 55);
    assert_eq!(fib(10), expected);
    assert_eq!(fib(0), 0);
    assert_eq!(fib(1), 1);
}

#[test]
fn test_repeated_lookup_is_idempotent() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    engine.add_module(add_module()).unwrap();

    let first = engine.lookup("add").unwrap();
    let second = engine.lookup("add").unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.stats().modules_compiled, 1);
    assert_eq!(engine.stats().lookups, 2);
}

#[test]
fn test_duplicate_symbol_then_remove_then_redefine() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    let tracker = engine.create_resource_tracker();
    engine
        .add_module_with_tracker(add_module(), &tracker)
        .unwrap();

    let err = engine.add_module(add_module()).unwrap_err();
    assert!(matches!(err, JitError::DuplicateSymbol { name, .. } if name == "add"));

    tracker.remove().unwrap();

    // the name is free again; the replacement really is new code
    let mut module = host_module("subtractor");
    let mut f = FunctionBuilder::new("add", 2);
    let a = f.param(0);
    let b = f.param(1);
    let diff = f.binary(BinOp::Sub, a, b);
    f.ret(diff);
    module.add_function(f.finish());
    engine.add_module(module).unwrap();

    let add = engine.lookup("add").unwrap();
    let add: extern "C" fn(i64, i64) -> i64 = unsafe { add.as_fn() };
    assert_eq!(add(5, 3), 2);
}

#[test]
fn test_unresolved_external_fails_lookup_but_not_siblings() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();

    let mut module = host_module("broken");
    let mut f = FunctionBuilder::new("calls_nothing_real", 0);
    let zero = f.iconst(0);
    let r = f.call("no_such_symbol_anywhere", &[zero]);
    f.ret(r);
    module.add_function(f.finish());
    engine.add_module(module).unwrap();
    engine.add_module(add_module()).unwrap();

    let err = engine.lookup("calls_nothing_real").unwrap_err();
    assert!(matches!(err, JitError::Unresolved { ref name } if name == "no_such_symbol_anywhere"));
    // the failure is sticky
    let again = engine.lookup("calls_nothing_real").unwrap_err();
    assert_eq!(err, again);

    // an unrelated module still materializes fine
    let add = engine.lookup("add").unwrap();
    let add: extern "C" fn(i64, i64) -> i64 = unsafe { add.as_fn() };
    assert_eq!(add(1, 1), 2);
}

extern "C" fn host_triple(x: i64) -> i64 {
    x * 3
}

#[test]
fn test_registered_host_function_is_callable() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    engine
        .register_symbols(&[("host_triple", Address::new(host_triple as usize as u64))])
        .unwrap();

    let mut module = host_module("caller");
    let mut f = FunctionBuilder::new("nine_times", 1);
    let x = f.param(0);
    let t = f.call("host_triple", &[x]);
    let t = f.call("host_triple", &[t]);
    f.ret(t);
    module.add_function(f.finish());
    engine.add_module(module).unwrap();

    let nine = engine.lookup("nine_times").unwrap();
    let nine: extern "C" fn(i64) -> i64 = unsafe { nine.as_fn() };
    assert_eq!(nine(2), 18);
}

#[test]
fn test_host_process_generator_resolves_libc() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();

    // labs(long) -> long comes from libc via the dylib search generator
    let mut module = host_module("libc_caller");
    let mut f = FunctionBuilder::new("magnitude", 1);
    let x = f.param(0);
    let r = f.call("labs", &[x]);
    f.ret(r);
    module.add_function(f.finish());
    engine.add_module(module).unwrap();

    let magnitude = engine.lookup("magnitude").unwrap();
    let magnitude: extern "C" fn(i64) -> i64 = unsafe { magnitude.as_fn() };
    assert_eq!(magnitude(-42), 42);
    assert_eq!(magnitude(7), 7);
    assert_eq!(engine.stats().generator_hits, 1);
}

#[test]
fn test_private_function_is_callable_but_not_visible() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();

    let mut module = host_module("hidden");
    let mut f = FunctionBuilder::new("double_impl", 1).private();
    let x = f.param(0);
    let two = f.iconst(2);
    let d = f.binary(BinOp::Mul, x, two);
    f.ret(d);
    module.add_function(f.finish());

    let mut f = FunctionBuilder::new("double", 1);
    let x = f.param(0);
    let d = f.call("double_impl", &[x]);
    f.ret(d);
    module.add_function(f.finish());
    engine.add_module(module).unwrap();

    let double = engine.lookup("double").unwrap();
    let double: extern "C" fn(i64) -> i64 = unsafe { double.as_fn() };
    assert_eq!(double(21), 42);

    assert!(matches!(
        engine.lookup("double_impl").unwrap_err(),
        JitError::Unresolved { .. }
    ));
}

#[test]
fn test_optimizer_preserves_semantics() {
    let optimized = JitEngine::create(EngineConfig::default()).unwrap();
    let baseline = JitEngine::create(EngineConfig::without_optimizer()).unwrap();

    // enough redundancy for every pass to bite
    let build = || {
        let mut module = host_module("busy");
        let mut f = FunctionBuilder::new("busy", 2);
        let a = f.param(0);
        let b = f.param(1);
        let zero = f.iconst(0);
        let a2 = f.binary(BinOp::Add, a, zero);
        let s1 = f.binary(BinOp::Add, a2, b);
        let s2 = f.binary(BinOp::Add, b, a);
        let same = f.binary(BinOp::Eq, s1, s2);
        let prod = f.binary(BinOp::Mul, s1, same);
        f.ret(prod);
        module.add_function(f.finish());
        module
    };

    optimized.add_module(build()).unwrap();
    baseline.add_module(build()).unwrap();

    let fast: extern "C" fn(i64, i64) -> i64 =
        unsafe { optimized.lookup("busy").unwrap().as_fn() };
    let slow: extern "C" fn(i64, i64) -> i64 =
        unsafe { baseline.lookup("busy").unwrap().as_fn() };

    for (a, b) in [(0, 0), (1, 2), (-5, 9), (1 << 40, -(1 << 30)), (i64::MAX, 1)] {
        assert_eq!(fast(a, b), slow(a, b));
    }
}

#[test]
fn test_end_session_blocks_the_engine() {
    let engine = JitEngine::create(EngineConfig::default()).unwrap();
    engine.add_module(add_module()).unwrap();
    let add = engine.lookup("add").unwrap();
    let add: extern "C" fn(i64, i64) -> i64 = unsafe { add.as_fn() };

    engine.end_session().unwrap();

    assert_eq!(engine.lookup("add").unwrap_err(), JitError::SessionTerminated);
    assert_eq!(
        engine.add_module(add_module()).unwrap_err(),
        JitError::SessionTerminated
    );
    // already-compiled code stays executable until the engine is dropped
    assert_eq!(add(20, 22), 42);
}
