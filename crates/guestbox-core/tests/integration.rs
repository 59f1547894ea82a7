//! Integration tests for guestbox-core.
//!
//! These tests drive real guests, written in WAT, through the whole pipeline:
//! - Compilation and WASI environment construction
//! - Host import binding and marshalling
//! - The startup protocol (`_start`, then `_initialize`)
//! - Memory access, the instance pool and closing

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use proptest::prelude::*;

use guestbox_common::{
    EngineConfig, ExecutionConfig, HostFunctionError, RuntimeConfig, RuntimeError, WasiConfig,
};
use guestbox_core::{
    EntrypointKind, GuestModule, HostFunctionSpec, HostGlobalSpec, HostImports, InstanceId,
    InstanceState, MemoryRegion, ResultArity, Runtime, WasmEngine,
};

fn engine() -> WasmEngine {
    WasmEngine::new(&EngineConfig::default()).unwrap()
}

fn runtime(wat: &str, imports: HostImports) -> Runtime {
    runtime_with(wat, &RuntimeConfig::default(), imports)
}

fn runtime_with(wat: &str, config: &RuntimeConfig, imports: HostImports) -> Runtime {
    Runtime::new(&engine(), "test", wat.as_bytes(), config, imports).unwrap()
}

const PAGE: usize = 65536;

// ============================================================================
// Test: Startup Protocol
// ============================================================================

#[test]
fn test_start_runs_exactly_once() {
    let wat = r#"
        (module
            (global $count (mut i32) (i32.const 0))
            (func (export "_start")
                (global.set $count (i32.add (global.get $count) (i32.const 1))))
            (func (export "count") (result i32)
                (global.get $count)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.entrypoints(), &[EntrypointKind::Command]);
    assert_eq!(instance.state(), InstanceState::Ready);
    assert_eq!(instance.call("count", &[]).unwrap(), Some(1));
}

#[test]
fn test_no_entrypoints_is_not_an_error() {
    let wat = r#"
        (module
            (global $touched (mut i32) (i32.const 0))
            (func (export "touched") (result i32) (global.get $touched)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert!(instance.entrypoints().is_empty());
    assert_eq!(instance.state(), InstanceState::Ready);
    assert_eq!(instance.call("touched", &[]).unwrap(), Some(0));
}

#[test]
fn test_start_runs_before_initialize() {
    let wat = r#"
        (module
            (global $trace (mut i32) (i32.const 0))
            (func (export "_initialize")
                (global.set $trace
                    (i32.add (i32.mul (global.get $trace) (i32.const 10)) (i32.const 2))))
            (func (export "_start")
                (global.set $trace
                    (i32.add (i32.mul (global.get $trace) (i32.const 10)) (i32.const 1))))
            (func (export "trace") (result i32) (global.get $trace)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(
        instance.entrypoints(),
        &[EntrypointKind::Command, EntrypointKind::Reactor]
    );
    assert_eq!(instance.call("trace", &[]).unwrap(), Some(12));
}

#[test]
fn test_reactor_only() {
    let wat = r#"
        (module
            (global $ready (mut i32) (i32.const 0))
            (func (export "_initialize") (global.set $ready (i32.const 1)))
            (func (export "ready") (result i32) (global.get $ready)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.entrypoints(), &[EntrypointKind::Reactor]);
    assert_eq!(instance.call("ready", &[]).unwrap(), Some(1));
}

#[test]
fn test_failing_start_discards_instance() {
    let wat = r#"
        (module
            (func (export "_start") unreachable))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let result = runtime.new_instance();

    assert!(matches!(
        result,
        Err(RuntimeError::EntrypointFailed { ref symbol, .. }) if symbol == "_start"
    ));
    assert!(runtime.is_empty());
}

#[test]
fn test_failing_initialize_discards_instance() {
    let wat = r#"
        (module
            (func (export "_initialize") unreachable))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let result = runtime.new_instance();

    assert!(matches!(
        result,
        Err(RuntimeError::EntrypointFailed { ref symbol, .. }) if symbol == "_initialize"
    ));
    assert!(runtime.is_empty());
}

#[test]
fn test_proc_exit_zero_is_success() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory (export "memory") 1)
            (func (export "_start") (call $exit (i32.const 0))))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    assert_eq!(handle.lock().entrypoints(), &[EntrypointKind::Command]);
}

#[test]
fn test_proc_exit_nonzero_fails() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory (export "memory") 1)
            (func (export "_start") (call $exit (i32.const 3))))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let err = runtime.new_instance().unwrap_err();

    assert!(matches!(err, RuntimeError::EntrypointFailed { .. }));
    assert!(err.to_string().contains("status 3"));
}

#[test]
fn test_start_with_wrong_signature_fails() {
    let wat = r#"
        (module
            (func (export "_start") (param i32)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    assert!(matches!(
        runtime.new_instance(),
        Err(RuntimeError::EntrypointFailed { .. })
    ));
}

// ============================================================================
// Test: Construction Failures
// ============================================================================

#[test]
fn test_invalid_module_fails_runtime_construction() {
    let result = Runtime::new(
        &engine(),
        "broken",
        b"\0asm\x01\x00\x00\x00\xff",
        &RuntimeConfig::default(),
        HostImports::new(),
    );
    assert!(matches!(result, Err(RuntimeError::CompilationFailed { .. })));

    let result = Runtime::new(
        &engine(),
        "text",
        b"(module (func",
        &RuntimeConfig::default(),
        HostImports::new(),
    );
    assert!(matches!(result, Err(RuntimeError::CompilationFailed { .. })));
}

#[test]
fn test_invalid_wasi_config_fails_runtime_construction() {
    let config = RuntimeConfig {
        wasi: WasiConfig::new().map_directory("data", "/definitely/not/a/dir"),
        ..Default::default()
    };
    let result = Runtime::new(
        &engine(),
        "test",
        b"(module)",
        &config,
        HostImports::new(),
    );
    assert!(matches!(result, Err(RuntimeError::Wasi(_))));
}

#[test]
fn test_missing_import_fails_instantiation() {
    let wat = r#"
        (module
            (import "env" "missing" (func)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let err = runtime.new_instance().unwrap_err();
    assert!(err.is_instantiation_error());
    assert!(runtime.is_empty());
}

#[test]
fn test_import_with_wrong_signature_fails_instantiation() {
    let wat = r#"
        (module
            (import "env" "value" (func (result i32))))
    "#;
    let imports = HostImports::new().function(HostFunctionSpec::new(
        "value",
        1,
        ResultArity::One,
        |_, args| Ok(Some(args[0])),
    ));

    let runtime = runtime(wat, imports);
    assert!(matches!(
        runtime.new_instance(),
        Err(RuntimeError::InstantiationFailed { .. })
    ));
}

// ============================================================================
// Test: Host Imports
// ============================================================================

struct Forwarder {
    runtime: Runtime,
    seen: Arc<Mutex<Vec<i32>>>,
}

fn fold(args: &[i32]) -> i32 {
    args.iter().fold(17, |acc: i32, &x| acc.wrapping_mul(31) ^ x)
}

/// A guest whose `call_forward` export passes its arguments straight to
/// `env.forward` and returns whatever that returns.
fn forwarder_wat(params: usize, results: ResultArity) -> String {
    let mut sig = String::new();
    if params > 0 {
        sig.push_str(" (param");
        sig.push_str(&" i32".repeat(params));
        sig.push(')');
    }
    if results == ResultArity::One {
        sig.push_str(" (result i32)");
    }
    let forwarded: String = (0..params).map(|i| format!(" (local.get {i})")).collect();

    format!(
        r#"
        (module
            (import "env" "forward" (func $forward{sig}))
            (func (export "call_forward"){sig}
                (call $forward{forwarded})))
        "#
    )
}

fn forwarder(params: usize, results: ResultArity) -> &'static Forwarder {
    static FORWARDERS: OnceLock<Vec<Forwarder>> = OnceLock::new();
    let all = FORWARDERS.get_or_init(|| {
        (0..=4)
            .flat_map(|params| [ResultArity::None, ResultArity::One].map(move |r| (params, r)))
            .map(|(params, results)| {
                let seen = Arc::new(Mutex::new(Vec::new()));
                let record = Arc::clone(&seen);
                let spec = HostFunctionSpec::new("forward", params, results, move |_, args| {
                    *record.lock().unwrap() = args.to_vec();
                    Ok((results == ResultArity::One).then(|| fold(args)))
                });
                let runtime = runtime(
                    &forwarder_wat(params, results),
                    HostImports::new().function(spec),
                );
                Forwarder { runtime, seen }
            })
            .collect()
    });
    &all[params * 2 + usize::from(results == ResultArity::One)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_host_call_passes_scalars_through(
        args in prop::collection::vec(any::<i32>(), 0..=4),
        returns in any::<bool>(),
    ) {
        let results = if returns { ResultArity::One } else { ResultArity::None };
        let forwarder = forwarder(args.len(), results);

        let handle = forwarder.runtime.new_instance().unwrap();
        let result = handle.lock().call("call_forward", &args).unwrap();
        forwarder.runtime.release(handle.id()).unwrap();

        let seen = forwarder.seen.lock().unwrap().clone();
        prop_assert_eq!(seen, args.clone());
        prop_assert_eq!(result, returns.then(|| fold(&args)));
    }
}

#[test]
fn test_host_function_without_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let imports = HostImports::new().function(HostFunctionSpec::new(
        "tick",
        0,
        ResultArity::None,
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        },
    ));
    let wat = r#"
        (module
            (import "env" "tick" (func $tick))
            (func (export "_start") (call $tick) (call $tick)))
    "#;

    let runtime = runtime(wat, imports);
    runtime.new_instance().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_host_error_aborts_guest_call() {
    let imports = HostImports::new().function(HostFunctionSpec::new(
        "deny",
        0,
        ResultArity::One,
        |_, _| Err(HostFunctionError::failed("denied")),
    ));
    let wat = r#"
        (module
            (import "env" "deny" (func $deny (result i32)))
            (global $after (mut i32) (i32.const 0))
            (func (export "run") (result i32)
                (drop (call $deny))
                (global.set $after (i32.const 1))
                (i32.const 7))
            (func (export "after") (result i32) (global.get $after)))
    "#;

    let runtime = runtime(wat, imports);
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    let err = instance.call("run", &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::HostFunction(HostFunctionError::Failed(ref m)) if m == "denied"
    ));

    // The frame after the host call never ran, and the instance is still usable.
    assert_eq!(instance.call("after", &[]).unwrap(), Some(0));
    assert_eq!(instance.state(), InstanceState::Ready);
}

#[test]
fn test_host_result_arity_violation() {
    let imports = HostImports::new().function(HostFunctionSpec::new(
        "value",
        0,
        ResultArity::One,
        |_, _| Ok(None),
    ));
    let wat = r#"
        (module
            (import "env" "value" (func $value (result i32)))
            (func (export "run") (result i32) (call $value)))
    "#;

    let runtime = runtime(wat, imports);
    let handle = runtime.new_instance().unwrap();

    let err = handle.lock().call("run", &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::HostFunction(HostFunctionError::ResultArity {
            declared: 1,
            returned: 0,
            ..
        })
    ));
}

#[test]
fn test_duplicate_import_last_registration_wins() {
    let constant = |value: i32| {
        HostFunctionSpec::new("value", 0, ResultArity::One, move |_, _| Ok(Some(value)))
    };
    let imports = HostImports::new().function(constant(1)).function(constant(2));
    let wat = r#"
        (module
            (import "env" "value" (func $value (result i32)))
            (func (export "get") (result i32) (call $value)))
    "#;

    let runtime = runtime(wat, imports);
    let handle = runtime.new_instance().unwrap();
    assert_eq!(handle.lock().call("get", &[]).unwrap(), Some(2));
}

#[test]
fn test_host_namespace_does_not_collide_with_wasi() {
    // The same field name in both namespaces resolves to two different functions.
    let imports = HostImports::new().function(HostFunctionSpec::new(
        "fd_write",
        0,
        ResultArity::One,
        |_, _| Ok(Some(99)),
    ));
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $wasi_write (param i32 i32 i32 i32) (result i32)))
            (import "env" "fd_write" (func $host_write (result i32)))
            (memory (export "memory") 1)
            (func (export "host") (result i32) (call $host_write))
            (func (export "wasi") (result i32)
                (call $wasi_write (i32.const 1) (i32.const 0) (i32.const 0) (i32.const 16))))
    "#;

    let runtime = runtime(wat, imports);
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.call("host", &[]).unwrap(), Some(99));
    // errno 0: zero iovecs written successfully
    assert_eq!(instance.call("wasi", &[]).unwrap(), Some(0));
}

#[test]
fn test_host_global() {
    let imports = HostImports::new().global(HostGlobalSpec::new("base", 40));
    let wat = r#"
        (module
            (import "env" "base" (global $base i32))
            (func (export "answer") (result i32)
                (i32.add (global.get $base) (i32.const 2))))
    "#;

    let runtime = runtime(wat, imports);
    let handle = runtime.new_instance().unwrap();
    assert_eq!(handle.lock().call("answer", &[]).unwrap(), Some(42));
}

#[test]
fn test_host_reads_and_writes_caller_memory() {
    let sum = HostFunctionSpec::new("sum", 2, ResultArity::One, |caller, args| {
        let bytes = caller.read(MemoryRegion::from_wire(args[0], args[1])?)?;
        Ok(Some(bytes.iter().map(|b| i32::from(*b)).sum()))
    });
    #[allow(clippy::cast_sign_loss)]
    let fill = HostFunctionSpec::new("fill", 2, ResultArity::None, |caller, args| {
        let bytes = vec![0xAB; args[1] as usize];
        caller.write(args[0] as u32, &bytes)?;
        Ok(None)
    });
    let wat = r#"
        (module
            (import "env" "sum" (func $sum (param i32 i32) (result i32)))
            (import "env" "fill" (func $fill (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 100) "\01\02\03\04")
            (func (export "sum") (param i32 i32) (result i32)
                (call $sum (local.get 0) (local.get 1)))
            (func (export "fill") (param i32 i32)
                (call $fill (local.get 0) (local.get 1))))
    "#;

    let runtime = runtime(wat, HostImports::new().function(sum).function(fill));
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.call("sum", &[100, 4]).unwrap(), Some(10));

    instance.call("fill", &[200, 3]).unwrap();
    assert_eq!(instance.read(200, 3).unwrap(), vec![0xAB; 3]);

    // Out of bounds from inside a host function aborts the call.
    let err = instance.call("sum", &[65530, 10]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::HostFunction(HostFunctionError::Memory { .. })
    ));
}

#[test]
fn test_host_sees_calling_instance_id() {
    let imports = HostImports::new().function(HostFunctionSpec::new(
        "who",
        0,
        ResultArity::None,
        |caller, _| {
            let id = caller.instance_id().to_string();
            Err(HostFunctionError::failed(id))
        },
    ));
    let wat = r#"
        (module
            (import "env" "who" (func $who))
            (func (export "who") (call $who)))
    "#;

    let runtime = runtime(wat, imports);
    let handle = runtime.new_instance().unwrap();

    let err = handle.lock().call("who", &[]).unwrap_err();
    assert!(err.to_string().contains(&handle.id().to_string()));
}

#[test]
fn test_new_instance_with_custom_imports() {
    let wat = r#"
        (module
            (import "env" "value" (func $value (result i32)))
            (func (export "get") (result i32) (call $value)))
    "#;
    let constant = |value: i32| {
        HostImports::new().function(HostFunctionSpec::new(
            "value",
            0,
            ResultArity::One,
            move |_, _| Ok(Some(value)),
        ))
    };

    let runtime = runtime(wat, constant(1));
    let default = runtime.new_instance().unwrap();
    let custom = runtime.new_instance_with(&constant(5)).unwrap();

    assert_eq!(default.lock().call("get", &[]).unwrap(), Some(1));
    assert_eq!(custom.lock().call("get", &[]).unwrap(), Some(5));
}

// ============================================================================
// Test: Memory Access
// ============================================================================

const MEMORY_WAT: &str = r#"
    (module
        (memory (export "memory") 1 4)
        (func (export "grow") (result i32) (memory.grow (i32.const 1)))
        (func (export "load") (param i32) (result i32) (i32.load8_u (local.get 0))))
"#;

#[test]
fn test_write_then_read_roundtrip() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.write(1024, b"guestbox").unwrap(), 8);
    assert_eq!(instance.read(1024, 8).unwrap(), b"guestbox");
    assert_eq!(instance.call("load", &[1024]).unwrap(), Some(i32::from(b'g')));
}

#[test]
fn test_out_of_bounds_access_fails_without_mutation() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    let end = u32::try_from(PAGE).unwrap();

    let err = instance.read(end - 4, 8).unwrap_err();
    assert!(err.is_memory_error());

    let err = instance.write(end - 4, &[0xFF; 8]).unwrap_err();
    assert!(err.is_memory_error());
    assert_eq!(instance.read(end - 4, 4).unwrap(), vec![0; 4]);

    let too_long = u32::try_from(PAGE + 1).unwrap();
    assert!(instance.read(0, too_long).unwrap_err().is_memory_error());
}

#[test]
fn test_memory_growth_is_observed() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    let beyond = u32::try_from(PAGE + 16).unwrap();
    assert_eq!(instance.memory_size().unwrap(), PAGE);
    assert!(instance.write(beyond, b"x").is_err());

    assert_eq!(instance.call("grow", &[]).unwrap(), Some(1));
    assert_eq!(instance.memory_size().unwrap(), 2 * PAGE);
    assert_eq!(instance.write(beyond, b"x").unwrap(), 1);
    assert_eq!(instance.read(beyond, 1).unwrap(), b"x");
}

#[test]
fn test_memory_limit_enforced() {
    let config = RuntimeConfig {
        execution: ExecutionConfig {
            max_memory_mb: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let wat = r#"
        (module
            (memory (export "memory") 0 4)
            (func (export "grow") (result i32) (memory.grow (i32.const 1))))
    "#;

    let runtime = runtime_with(wat, &config, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    assert_eq!(handle.lock().call("grow", &[]).unwrap(), Some(-1));
}

#[test]
fn test_instances_have_independent_memory() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let first = runtime.new_instance().unwrap();
    let second = runtime.new_instance().unwrap();

    assert_ne!(first.id(), second.id());

    first.lock().write(64, b"mine").unwrap();
    assert_eq!(second.lock().read(64, 4).unwrap(), vec![0; 4]);
    assert_eq!(first.lock().read(64, 4).unwrap(), b"mine");
}

#[test]
fn test_module_without_memory() {
    let runtime = runtime("(module)", HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert!(matches!(
        instance.read(0, 1),
        Err(RuntimeError::ExportNotFound { ref name, .. }) if name == "memory"
    ));
    assert!(instance.write(0, b"x").is_err());
}

// ============================================================================
// Test: Exported Calls
// ============================================================================

#[test]
fn test_call_errors() {
    let wat = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                (i32.add (local.get 0) (local.get 1)))
            (func (export "half") (param f64) (result f64) (f64.div (local.get 0) (f64.const 2)))
            (func (export "pair") (result i32 i32) (i32.const 1) (i32.const 2)))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.call("add", &[2, 3]).unwrap(), Some(5));
    assert_eq!(instance.call("add", &[i32::MAX, 1]).unwrap(), Some(i32::MIN));

    for (name, args) in [
        ("missing", &[][..]),
        ("add", &[1][..]),
        ("half", &[][..]),
        ("pair", &[][..]),
    ] {
        let err = instance.call(name, args).unwrap_err();
        assert!(
            matches!(err, RuntimeError::ExportNotFound { .. }),
            "{name}: {err}"
        );
    }
}

#[test]
fn test_guest_trap_is_reported() {
    let wat = r#"
        (module
            (func (export "boom") unreachable))
    "#;

    let runtime = runtime(wat, HostImports::new());
    let handle = runtime.new_instance().unwrap();

    assert!(matches!(
        handle.lock().call("boom", &[]),
        Err(RuntimeError::Trap { .. })
    ));
}

#[test]
fn test_fuel_exhaustion() {
    let engine = WasmEngine::new(&EngineConfig {
        fuel_metering: true,
        ..Default::default()
    })
    .unwrap();
    let config = RuntimeConfig {
        execution: ExecutionConfig {
            max_fuel: 10_000,
            ..Default::default()
        },
        ..Default::default()
    };
    let wat = r#"
        (module
            (func (export "spin") (loop $l (br $l))))
    "#;

    let runtime = Runtime::new(&engine, "spin", wat.as_bytes(), &config, HostImports::new())
        .unwrap();
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.remaining_fuel().unwrap(), Some(10_000));
    assert!(matches!(
        instance.call("spin", &[]),
        Err(RuntimeError::FuelExhausted)
    ));
}

// ============================================================================
// Test: WASI Environment
// ============================================================================

#[test]
fn test_stdout_capture() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 8) "hello\n")
            (func (export "_start")
                (i32.store (i32.const 0) (i32.const 8))
                (i32.store (i32.const 4) (i32.const 6))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 20)))))
    "#;
    let config = RuntimeConfig {
        wasi: WasiConfig::new().capture_stdio(),
        ..Default::default()
    };

    let runtime = runtime_with(wat, &config, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    assert_eq!(instance.stdout().unwrap(), "hello\n");
    assert_eq!(instance.stderr().unwrap(), "");
}

#[test]
fn test_uncaptured_stdio_reads_empty() {
    let runtime = runtime("(module)", HostImports::new());
    let handle = runtime.new_instance().unwrap();
    assert_eq!(handle.lock().stdout().unwrap(), "");
}

#[test]
fn test_arguments_and_environment_visible() {
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "args_sizes_get"
                (func $args_sizes_get (param i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "environ_sizes_get"
                (func $environ_sizes_get (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "argc") (result i32)
                (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
                (i32.load (i32.const 0)))
            (func (export "envc") (result i32)
                (drop (call $environ_sizes_get (i32.const 0) (i32.const 4)))
                (i32.load (i32.const 0))))
    "#;
    let config = RuntimeConfig {
        wasi: WasiConfig::new()
            .arg("one")
            .arg("two")
            .env("A", "1")
            .env("B", "2")
            .env("C", "3"),
        ..Default::default()
    };

    let runtime = runtime_with(wat, &config, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    // Program name plus two arguments.
    assert_eq!(instance.call("argc", &[]).unwrap(), Some(3));
    assert_eq!(instance.call("envc", &[]).unwrap(), Some(3));
}

#[test]
fn test_directory_mapping_is_preopened() {
    let dir = tempfile::tempdir().unwrap();
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_prestat_get"
                (func $fd_prestat_get (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "prestat") (param i32) (result i32)
                (call $fd_prestat_get (local.get 0) (i32.const 0))))
    "#;
    let config = RuntimeConfig {
        wasi: WasiConfig::new().map_directory("data", dir.path()),
        ..Default::default()
    };

    let runtime = runtime_with(wat, &config, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();

    // fd 3 is the first pre-opened directory; fd 4 does not exist (EBADF = 8).
    assert_eq!(instance.call("prestat", &[3]).unwrap(), Some(0));
    assert_eq!(instance.call("prestat", &[4]).unwrap(), Some(8));
}

// ============================================================================
// Test: Instance Pool
// ============================================================================

#[test]
fn test_get_unknown_instance() {
    let runtime = runtime("(module)", HostImports::new());
    let err = runtime.get(InstanceId::new()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_get_returns_registered_instance() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    handle.lock().write(0, b"id").unwrap();

    let found = runtime.get(handle.id()).unwrap();
    assert_eq!(found.id(), handle.id());
    assert_eq!(found.lock().read(0, 2).unwrap(), b"id");
    assert_eq!(runtime.instances(), vec![handle.id()]);
}

#[test]
fn test_concurrent_instance_creation() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());

    let ids: Vec<InstanceId> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    (0..4)
                        .map(|_| runtime.new_instance().unwrap().id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 32);
    assert_eq!(runtime.len(), 32);
    for id in ids {
        assert!(runtime.get(id).is_ok());
    }
}

#[test]
fn test_concurrent_lookups_during_inserts() {
    let runtime = runtime("(module)", HostImports::new());
    let seed = runtime.new_instance().unwrap().id();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..8 {
                    runtime.new_instance().unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..64 {
                    assert!(runtime.get(seed).is_ok());
                    assert!(runtime.get(InstanceId::new()).is_err());
                }
            });
        }
    });

    assert_eq!(runtime.len(), 33);
}

// ============================================================================
// Test: Close and Release
// ============================================================================

#[test]
fn test_closed_instance_rejects_everything() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();
    assert!(instance.state().is_accessible());

    instance.close().unwrap();
    assert_eq!(instance.state(), InstanceState::Closed);
    assert!(!instance.state().is_accessible());
    assert!(instance.is_closed());

    let closed = |r: Result<_, RuntimeError>| matches!(r, Err(RuntimeError::InstanceClosed { .. }));
    assert!(closed(instance.call("grow", &[]).map(|_| ())));
    assert!(closed(instance.read(0, 1).map(|_| ())));
    assert!(closed(instance.write(0, b"x").map(|_| ())));
    assert!(closed(instance.memory_size().map(|_| ())));
    assert!(closed(instance.stdout().map(|_| ())));
    assert!(closed(instance.close()));
}

#[test]
fn test_release_unregisters_and_closes() {
    let runtime = runtime(MEMORY_WAT, HostImports::new());
    let keep = runtime.new_instance().unwrap();
    let drop_me = runtime.new_instance().unwrap();

    runtime.release(drop_me.id()).unwrap();

    assert_eq!(runtime.len(), 1);
    assert_eq!(runtime.instances(), vec![keep.id()]);
    assert!(runtime.get(drop_me.id()).unwrap_err().is_not_found());
    assert!(drop_me.lock().is_closed());
    assert!(runtime.release(drop_me.id()).unwrap_err().is_not_found());
}

// ============================================================================
// Test: Module Sources
// ============================================================================

#[test]
fn test_runtime_from_files() {
    let engine = engine();
    let dir = tempfile::tempdir().unwrap();
    let wat = r#"(module (func (export "seven") (result i32) i32.const 7))"#;

    let wat_path = dir.path().join("seven.wat");
    std::fs::write(&wat_path, wat).unwrap();
    let runtime =
        Runtime::from_file(&engine, &wat_path, &RuntimeConfig::default(), HostImports::new())
            .unwrap();
    assert_eq!(runtime.module().name(), "seven");

    let artifact = runtime.module().serialize().unwrap();
    let cwasm_path = dir.path().join("seven.cwasm");
    std::fs::write(&cwasm_path, artifact).unwrap();

    let runtime = Runtime::from_file(
        &engine,
        &cwasm_path,
        &RuntimeConfig::default(),
        HostImports::new(),
    )
    .unwrap();
    let handle = runtime.new_instance().unwrap();
    assert_eq!(handle.lock().call("seven", &[]).unwrap(), Some(7));
}

#[test]
fn test_configured_name_becomes_program_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stem.wat");
    let wat = r#"
        (module
            (import "wasi_snapshot_preview1" "args_sizes_get"
                (func $args_sizes_get (param i32 i32) (result i32)))
            (import "wasi_snapshot_preview1" "args_get"
                (func $args_get (param i32 i32) (result i32)))
            (memory (export "memory") 1)
            (func (export "load_args") (result i32)
                (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
                (call $args_get (i32.const 64) (i32.const 256))))
    "#;
    std::fs::write(&path, wat).unwrap();

    let runtime = Runtime::from_file_named(
        &engine(),
        &path,
        "configured",
        &RuntimeConfig::default(),
        HostImports::new(),
    )
    .unwrap();
    assert_eq!(runtime.module().name(), "configured");
    assert_eq!(runtime.wasi().program_name(), "configured");

    let handle = runtime.new_instance().unwrap();
    let mut instance = handle.lock();
    assert_eq!(instance.call("load_args", &[]).unwrap(), Some(0));

    // argv[0] is written first into the buffer, NUL terminated.
    assert_eq!(instance.read(256, 11).unwrap(), b"configured\0");
}

#[test]
fn test_runtime_from_module() {
    let engine = engine();
    let module = GuestModule::from_wat(
        engine.inner(),
        "shared",
        r#"(module (func (export "one") (result i32) i32.const 1))"#,
    )
    .unwrap();

    let runtime = Runtime::from_module(
        &engine,
        module.clone(),
        &RuntimeConfig::default(),
        HostImports::new(),
    )
    .unwrap();
    let other =
        Runtime::from_module(&engine, module, &RuntimeConfig::default(), HostImports::new())
            .unwrap();

    let a = runtime.new_instance().unwrap();
    let b = other.new_instance().unwrap();
    assert_eq!(a.lock().call("one", &[]).unwrap(), Some(1));
    assert_eq!(b.lock().call("one", &[]).unwrap(), Some(1));
    assert!(other.get(a.id()).is_err());
}

#[test]
fn test_missing_file() {
    let result = Runtime::from_file(
        &engine(),
        "/definitely/not/here.wasm",
        &RuntimeConfig::default(),
        HostImports::new(),
    );
    assert!(matches!(result, Err(RuntimeError::Io(_))));
}
