use std::any::TypeId;
use std::sync::Arc;

use serde_json::json;
use tether_engine::{Local, MemoryEngine};
use tether_types::ReturnKind;

use super::*;
use crate::bridge::{ClassInterceptor, InterceptorContext};
use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::marshal::{AGED_OUT, MethodDescriptor, NOT_HOST, ParamKind, Signature};
use crate::value::HostValue;

#[derive(Debug)]
struct Counter {
    count: i32,
}

#[derive(Debug)]
struct Gauge {
    level: f64,
}

fn counter_class() -> HostClass<Counter> {
    HostClass::new("Counter")
        .constructor(Signature::empty(), |_, _| Ok(Counter { count: 0 }))
        .constructor(Signature::new([ParamKind::Int]), |_, args| Ok(Counter { count: args.i32(0)? }))
        .method("add", Signature::new([ParamKind::Int]), |counter, _, args| {
            counter.count += args.i32(0)?;
            Ok(HostValue::Int(counter.count))
        })
        .method("get", Signature::empty(), |counter, _, _| Ok(HostValue::Int(counter.count)))
        .static_method(MethodDescriptor::callback("describe", |_| Ok("counts things".into())).returns(ReturnKind::String))
}

fn gauge_class() -> HostClass<Gauge> {
    HostClass::<Gauge>::named_after_type().method("level", Signature::empty(), |gauge, _, _| {
        Ok(HostValue::Double(gauge.level))
    })
}

/// Scripts used across the tests, written against the engine's scope API.
fn scripted_engine() -> MemoryEngine {
    let engine = MemoryEngine::new();
    engine.define_script("var c = new Counter(5); c.add(3)", |s| {
        let constructor = s.get_global("Counter")?;
        let counter = s.construct(&constructor, vec![5.into()])?;
        s.set_global("c", counter.clone())?;
        s.call_method(&counter, "add", vec![3.into()])
    });
    engine.define_script("c.$release()", |s| {
        let counter = s.get_global("c")?;
        s.call_method(&counter, "$release", Vec::new())
    });
    engine.define_script("Counter(1)", |s| s.call_global("Counter", vec![1.into()]));
    engine.define_script("new Counter('x')", |s| {
        let constructor = s.get_global("Counter")?;
        s.construct(&constructor, vec!["x".into()])
    });
    engine.define_script("Counter.describe()", |s| {
        let constructor = s.get_global("Counter")?;
        s.call_method(&constructor, "describe", Vec::new())
    });
    engine.define_script("shared.add(1)", |s| {
        let shared = s.get_global("shared")?;
        s.call_method(&shared, "add", vec![1.into()])
    });
    engine.define_script("new ns.Counter(2).get()", |s| {
        let ns = s.get_global("ns")?;
        let constructor = s.get(&ns, "Counter")?;
        let counter = s.construct(&constructor, vec![2.into()])?;
        s.call_method(&counter, "get", Vec::new())
    });
    for name in ["shared", "gauge", "temp"] {
        let source = format!("total({})", name);
        engine.define_script(&source, move |s| {
            let value = s.get_global(name)?;
            s.call_global("total", vec![value])
        });
    }
    engine.define_script("total({})", |s| {
        let plain = s.new_object();
        s.call_global("total", vec![plain])
    });
    engine
}

fn runtime() -> Runtime {
    Runtime::with_engine(Arc::new(scripted_engine()), RuntimeConfig::new("bridge")).unwrap()
}

fn script_message(err: Error) -> String {
    match err {
        Error::Script(e) => e.message,
        other => panic!("expected a script exception, got {other:?}"),
    }
}

fn register_total(runtime: &Runtime) {
    let total = MethodDescriptor::method("total")
        .overload(Signature::new([ParamKind::host::<Counter>()]), |_, args| {
            Ok(HostValue::Int(args.object(0)?.with(|c: &Counter| c.count)?))
        })
        .returns(ReturnKind::Integer);
    runtime.register_method(total).unwrap();
}

#[test]
fn test_script_constructs_and_calls_host_class() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();
    assert!(runtime.bridge().is_registered::<Counter>());

    assert_eq!(runtime.execute_integer_script("var c = new Counter(5); c.add(3)").unwrap(), 8);

    let proxy = runtime.get_object("c").unwrap();
    let Resolved::Host(object) = host_object_of(&proxy).unwrap() else {
        panic!("c should resolve to its host object");
    };
    assert_eq!(object.with(|c: &Counter| c.count).unwrap(), 8);
    assert_eq!(runtime.bridge().unreleased_instances(), vec![("Counter".to_string(), 1)]);

    // $release hands back the receiver
    let released = runtime.execute_object_script("c.$release()").unwrap();
    assert!(released.strict_equals(&proxy).unwrap());
    assert!(runtime.bridge().unreleased_instances().is_empty());

    // nothing keeps the instance alive once the host lets go
    drop(object);
    assert!(matches!(host_object_of(&proxy).unwrap(), Resolved::AgedOut));
    assert_eq!(runtime.bridge().entry_count(), 0);

    released.release().unwrap();
    proxy.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_constructor_errors() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();

    let plain = script_message(runtime.execute_script("Counter(1)").unwrap_err());
    assert!(plain.contains("Counter must be called with new"));

    let no_match = script_message(runtime.execute_script("new Counter('x')").unwrap_err());
    assert!(no_match.contains("No constructor exists for Counter with specified arguments."));

    assert!(runtime.bridge().unreleased_instances().is_empty());
    runtime.release().unwrap();
}

#[test]
fn test_static_methods_live_on_the_constructor() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();
    assert_eq!(runtime.execute_string_script("Counter.describe()").unwrap(), "counts things");
    runtime.release().unwrap();
}

#[test]
fn test_registering_twice_fails() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();
    let err = inject_class(&runtime, counter_class()).unwrap_err();
    assert!(matches!(err, Error::Argument(ref m) if m.contains("already registered")));
    runtime.release().unwrap();
}

#[test]
fn test_class_injected_into_namespace() {
    let runtime = runtime();
    let ns = runtime.new_object().unwrap();
    inject_class_into(&ns, counter_class()).unwrap();
    runtime.set("ns", &ns).unwrap();

    assert_eq!(runtime.execute_integer_script("new ns.Counter(2).get()").unwrap(), 2);
    assert!(!runtime.contains("Counter").unwrap());

    ns.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_injected_object_keeps_one_proxy() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();

    let object = HostObject::new(Counter { count: 2 });
    let id = inject_object(&runtime, "shared", &object).unwrap();
    assert!(id.starts_with("OHID"));
    assert_eq!(runtime.bridge().id_of(&object), Some(id.clone()));
    assert!(runtime.bridge().lookup(&id).unwrap().ptr_eq(&object));

    // handing the same object over again reuses its proxy
    runtime.set("again", HostValue::Object(object.clone())).unwrap();
    let first = runtime.get_object("shared").unwrap();
    let second = runtime.get_object("again").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get_string(crate::bridge::OBJECT_ID_KEY).unwrap(), id);

    assert_eq!(runtime.execute_integer_script("shared.add(1)").unwrap(), 3);
    assert_eq!(object.with(|c: &Counter| c.count).unwrap(), 3);

    first.release().unwrap();
    second.release().unwrap();
    runtime.release().unwrap();
}

#[test]
fn test_host_object_parameters() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();
    inject_class(&runtime, gauge_class()).unwrap();
    register_total(&runtime);

    let shared = HostObject::new(Counter { count: 4 });
    inject_object(&runtime, "shared", &shared).unwrap();
    assert_eq!(runtime.execute_integer_script("total(shared)").unwrap(), 4);

    let gauge = HostObject::new(Gauge { level: 0.5 });
    inject_object(&runtime, "gauge", &gauge).unwrap();
    let wrong = script_message(runtime.execute_script("total(gauge)").unwrap_err());
    assert!(wrong.contains("does not match the signature"));

    let plain = script_message(runtime.execute_script("total({})").unwrap_err());
    assert!(plain.contains(NOT_HOST));

    let temp = HostObject::new(Counter { count: 1 });
    let temp_id = inject_object(&runtime, "temp", &temp).unwrap();
    drop(temp);
    let aged = script_message(runtime.execute_script("total(temp)").unwrap_err());
    assert!(aged.contains(AGED_OUT));
    // the miss swept the dead entry
    assert!(runtime.bridge().lookup(&temp_id).is_none());
    assert_eq!(runtime.bridge().entry_count(), 2);

    assert_eq!(runtime.object_reference_count(), 0);
    runtime.release().unwrap();
}

#[test]
fn test_attach_checks_the_class() {
    let runtime = runtime();
    inject_class(&runtime, counter_class()).unwrap();
    let inner = runtime.inner();
    let class = inner.bridge.class(TypeId::of::<Counter>()).unwrap();

    let proxy = runtime.new_object().unwrap();
    let err = inner
        .bridge
        .attach(inner, &proxy, &HostObject::new(Gauge { level: 1.0 }), &class)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot attach host object of type [Gauge] using proxy for type [Counter]"
    );

    let unregistered = inject_object(&runtime, "gauge", &HostObject::new(Gauge { level: 1.0 })).unwrap_err();
    assert!(matches!(unregistered, Error::Argument(ref m) if m.contains("No host class registered")));

    proxy.release().unwrap();
    runtime.release().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Interceptors
// ─────────────────────────────────────────────────────────────────────────────

struct Settings {
    volume: i64,
}

struct SettingsInterceptor;

impl ClassInterceptor<Settings> for SettingsInterceptor {
    fn on_inject(&self, context: &mut InterceptorContext, settings: &Settings) {
        context.insert("volume".to_string(), json!(settings.volume));
    }

    fn on_extract(&self, context: &InterceptorContext, settings: &mut Settings) {
        if let Some(volume) = context.get("volume").and_then(|v| v.as_i64()) {
            settings.volume = volume;
        }
    }
}

#[test]
fn test_interceptor_round_trip() {
    let engine = MemoryEngine::new();
    engine.define_script("apply(settings)", |s| {
        let settings = s.get_global("settings")?;
        s.call_global("apply", vec![settings])
    });
    engine.define_script("settings.onInject = ctx => { seen = ctx.volume; }", |s| {
        let settings = s.get_global("settings")?;
        let hook = s.new_function(|s| {
            let volume = s.get(&s.arg(0), "volume")?;
            s.set_global("seen", volume)?;
            Ok(Local::Undefined)
        });
        s.set(&settings, "onInject", hook)?;
        Ok(Local::Undefined)
    });
    let runtime = Runtime::with_engine(Arc::new(engine), RuntimeConfig::default()).unwrap();

    let class = HostClass::<Settings>::new("Settings").interceptor(SettingsInterceptor);
    inject_class(&runtime, class).unwrap();
    let apply = MethodDescriptor::method("apply").overload(
        Signature::new([ParamKind::host::<Settings>()]),
        |_, args| Ok(HostValue::Long(args.object(0)?.with(|s: &Settings| s.volume)?)),
    );
    runtime.register_method(apply).unwrap();

    let settings = HostObject::new(Settings { volume: 3 });
    inject_object(&runtime, "settings", &settings).unwrap();
    let proxy = runtime.get_object("settings").unwrap();
    assert_eq!(proxy.get_integer("volume").unwrap(), 3);

    // script edits the plain property; the host sees it on the way back in
    proxy.set("volume", 7).unwrap();
    assert_eq!(runtime.execute_integer_script("apply(settings)").unwrap(), 7);
    assert_eq!(settings.with(|s: &Settings| s.volume).unwrap(), 7);

    // re-injecting runs the script hook with the fresh context
    runtime
        .execute_void_script("settings.onInject = ctx => { seen = ctx.volume; }")
        .unwrap();
    settings.with_mut(|s: &mut Settings| s.volume = 9).unwrap();
    runtime.set("again", HostValue::Object(settings.clone())).unwrap();
    assert_eq!(runtime.get_integer("seen").unwrap(), 9);
    assert_eq!(proxy.get_integer("volume").unwrap(), 9);

    proxy.release().unwrap();
    runtime.release().unwrap();
}
