use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use tether_engine::Local;

use super::*;
use crate::array::ArrayLike;
use crate::error::ErrorKind;
use crate::function::Callable;
use crate::object::ObjectLike;

fn runtime_with(engine: MemoryEngine) -> Runtime {
    Runtime::with_engine(Arc::new(engine), RuntimeConfig::default()).unwrap()
}

#[test]
fn test_create_and_release() {
    let runtime = Runtime::with_config(RuntimeConfig::new("lifecycle")).unwrap();
    assert!(Runtime::active_runtimes() >= 1);
    assert_eq!(runtime.name(), "lifecycle");
    assert!(!runtime.is_released());

    runtime.release().unwrap();
    assert!(runtime.is_released());
    // releasing twice is a no-op
    runtime.release().unwrap();

    assert!(matches!(runtime.new_object(), Err(Error::Released("Runtime"))));
    assert!(matches!(runtime.execute_script("1"), Err(Error::Released("Runtime"))));
}

#[test]
fn test_release_refused_while_handles_are_outstanding() {
    let runtime = Runtime::create().unwrap();
    let a = runtime.new_object().unwrap();
    let b = runtime.new_array().unwrap();

    let err = runtime.release().unwrap_err();
    assert!(matches!(err, Error::OutstandingHandles(2)));
    assert_eq!(err.kind(), ErrorKind::State);

    // still usable after the failed release
    a.set("x", 1).unwrap();
    a.release().unwrap();
    b.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_forced_release_with_outstanding_handles() {
    let runtime = Runtime::create().unwrap();
    let handle = runtime.new_object().unwrap();

    runtime.release_with(false).unwrap();
    assert!(runtime.is_released());
    // the isolate took the reference with it
    assert!(matches!(handle.get("x"), Err(Error::Released("Runtime"))));
    handle.release().unwrap();
    assert!(matches!(handle.get("x"), Err(Error::Released("Handle"))));
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = Runtime::with_config(RuntimeConfig::new(" ")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_foreign_thread_is_rejected_until_handoff() {
    let runtime = Runtime::create().unwrap();

    let other = runtime.clone();
    let denied = thread::spawn(move || other.execute_integer_script("1").map_err(|e| e.kind()))
        .join()
        .unwrap();
    assert_eq!(denied, Err(ErrorKind::ThreadAffinity));

    runtime.locker().release().unwrap();
    let other = runtime.clone();
    let value = thread::spawn(move || -> Result<i32> {
        other.locker().acquire()?;
        let value = other.execute_integer_script("7");
        other.locker().release()?;
        value
    })
    .join()
    .unwrap()
    .unwrap();
    assert_eq!(value, 7);

    runtime.locker().acquire().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_process_wide_mode_binds_one_thread() {
    let config = RuntimeConfig::new("pinned").with_thread_mode(ThreadMode::ProcessWide);

    let first = config.clone();
    thread::spawn(move || {
        let runtime = Runtime::with_config(first).unwrap();
        // pinned lockers never move
        runtime.locker().release().unwrap();
        runtime.locker().acquire().unwrap();
        runtime.release().unwrap();
    })
    .join()
    .unwrap();

    let denied = thread::spawn(move || Runtime::with_config(config).map(|_| ()).map_err(|e| e.kind()))
        .join()
        .unwrap();
    assert_eq!(denied, Err(ErrorKind::ThreadAffinity));
}

#[test]
fn test_typed_results() {
    let runtime = Runtime::create().unwrap();

    assert_eq!(runtime.execute_integer_script("42").unwrap(), 42);
    assert_eq!(runtime.execute_double_script("2.5").unwrap(), 2.5);
    assert_eq!(runtime.execute_double_script("3").unwrap(), 3.0);
    assert!(runtime.execute_boolean_script("true").unwrap());
    assert_eq!(runtime.execute_string_script(r#""hi""#).unwrap(), "hi");

    let object = runtime.execute_object_script(r#"{"a": 1}"#).unwrap();
    assert_eq!(object.get_integer("a").unwrap(), 1);
    let array = runtime.execute_array_script("[1, 2]").unwrap();
    assert_eq!(array.length().unwrap(), 2);

    runtime.execute_void_script(r#"{"discarded": true}"#).unwrap();
    assert_eq!(runtime.object_reference_count(), 2);

    object.release().unwrap();
    array.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_mismatch_undefined_and_exception_are_distinct() {
    let engine = MemoryEngine::new();
    engine.define_script("throw new Error('boom')", |scope| Err(scope.throw_error("boom")));
    let runtime = runtime_with(engine);

    let mismatch = runtime.execute_integer_script(r#""text""#).unwrap_err();
    assert!(matches!(
        mismatch,
        Error::ResultTypeMismatch {
            expected: ValueKind::Integer,
            actual: ValueKind::String
        }
    ));

    let undefined = runtime.execute_integer_script("null").unwrap_err();
    assert!(matches!(undefined, Error::UndefinedResult { expected: ValueKind::Integer }));
    let undefined = runtime.execute_string_script("undefined").unwrap_err();
    assert!(matches!(undefined, Error::UndefinedResult { .. }));
    assert_eq!(mismatch.kind(), ErrorKind::TypeMismatch);
    assert_eq!(undefined.kind(), ErrorKind::UndefinedResult);

    // an object result that does not fit is released, not leaked
    assert!(runtime.execute_string_script("{}").is_err());
    assert_eq!(runtime.object_reference_count(), 0);

    let origin = ScriptOrigin::new("boom.js", 10);
    let thrown = runtime
        .execute_script_at("throw new Error('boom')", &origin)
        .unwrap_err();
    match thrown {
        Error::Script(e) => {
            assert!(!e.is_compilation());
            assert_eq!(e.file_name, "boom.js");
            assert_eq!(e.line_number, 11);
            assert!(e.message.contains("boom"));
        }
        other => panic!("expected a script exception, got {other:?}"),
    }

    runtime.release().unwrap();
}

#[test]
fn test_unregistered_source_is_a_compile_error() {
    let runtime = Runtime::create().unwrap();
    match runtime.execute_script("let x = ;") {
        Err(Error::Script(e)) => assert!(e.is_compilation()),
        other => panic!("expected a compile error, got {other:?}"),
    }
    runtime.release().unwrap();
}

#[test]
fn test_script_functions_are_callable() {
    let engine = MemoryEngine::new();
    engine.define_script("(function (a, b) { return a * b; })", |scope| {
        Ok(scope.new_function(|s| {
            let a = s.arg(0).as_i32().unwrap_or(0);
            let b = s.arg(1).as_i32().unwrap_or(0);
            Ok(Local::Integer(a * b))
        }))
    });
    let runtime = runtime_with(engine);

    let multiply = runtime
        .execute_script("(function (a, b) { return a * b; })")
        .unwrap()
        .into_handle()
        .unwrap();
    assert_eq!(multiply.kind(), ValueKind::Function);
    assert_eq!(multiply.call_integer(None, vec![6.into(), 7.into()]).unwrap(), 42);
    assert!(matches!(
        multiply.call_string(None, vec![1.into(), 1.into()]),
        Err(Error::ResultTypeMismatch { .. })
    ));

    let object = runtime.new_object().unwrap();
    assert!(matches!(object.call(None, Vec::new()), Err(Error::Argument(_))));

    multiply.release().unwrap();
    object.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_termination_from_another_thread() {
    let engine = MemoryEngine::new();
    engine.define_script("while (true) {}", |scope| loop {
        scope.check()?;
        thread::yield_now();
    });
    let runtime = runtime_with(engine);

    let terminator = {
        let handle = runtime.termination_handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.terminate();
        })
    };
    let err = runtime.execute_script("while (true) {}").unwrap_err();
    terminator.join().unwrap();
    assert!(matches!(err, Error::Terminated));

    // the runtime is still usable afterwards
    assert_eq!(runtime.execute_integer_script("1").unwrap(), 1);
    runtime.release().unwrap();
}

#[derive(Default)]
struct Counting {
    created: AtomicUsize,
    disposed: AtomicUsize,
}

impl ReferenceHandler for Counting {
    fn handle_created(&self, _handle: &Handle) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_disposed(&self, _id: NativeId) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_reference_handlers_see_every_handle() {
    let runtime = Runtime::create().unwrap();
    let counting = Arc::new(Counting::default());
    let id = runtime.add_reference_handler(counting.clone());

    let object = runtime.new_object().unwrap();
    let twin = object.twin().unwrap();
    object.release().unwrap();
    drop(twin);
    assert_eq!(counting.created.load(Ordering::SeqCst), 2);
    assert_eq!(counting.disposed.load(Ordering::SeqCst), 2);

    runtime.remove_reference_handler(id);
    runtime.new_object().unwrap().release().unwrap();
    assert_eq!(counting.created.load(Ordering::SeqCst), 2);

    runtime.release().unwrap();
}

#[test]
fn test_global_object_and_alias() {
    let runtime = Runtime::with_config(RuntimeConfig::new("aliased").with_global_alias("global")).unwrap();
    runtime.set("answer", 42).unwrap();
    assert_eq!(runtime.execute_integer_script("global.answer").unwrap(), 42);
    assert_eq!(runtime.execute_integer_script("answer").unwrap(), 42);

    let first = runtime.global_object().unwrap();
    let second = runtime.global_object().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get_integer("answer").unwrap(), 42);
    assert_eq!(runtime.object_reference_count(), 2);

    first.release().unwrap();
    second.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_new_array_from_items() {
    let runtime = Runtime::create().unwrap();
    let array = runtime.new_array_from([1, 2, 3]).unwrap();
    assert_eq!(array.integers(0..3).unwrap(), vec![1, 2, 3]);
    assert_eq!(runtime.object_reference_count(), 1);
    array.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_diagnostics_snapshot() {
    let runtime = Runtime::with_config(RuntimeConfig::new("diag")).unwrap();
    runtime.register_callback("noop", |_| Ok(HostValue::Undefined)).unwrap();
    let object = runtime.new_object().unwrap();

    let diagnostics = runtime.diagnostics();
    assert_eq!(diagnostics.name, "diag");
    assert_eq!(diagnostics.object_references, 1);
    assert_eq!(diagnostics.callbacks, 1);
    assert!(diagnostics.owned);
    assert!(!diagnostics.released);

    object.release().unwrap();
    runtime.collect_garbage().unwrap();
    runtime.release().unwrap();
    assert!(runtime.diagnostics().released);
}
