//! Host class descriptions and their per-runtime proxies.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tether_engine::NativeId;

use super::interceptor::{ErasedInterceptor, Typed};
use super::{ClassInterceptor, HostObject, InterceptorContext, Resolved};
use crate::error::Error;
use crate::marshal::{Args, CallContext, MethodDescriptor, Overload, Signature, short_type_name};
use crate::value::HostValue;

type ConstructorFn<T> = dyn Fn(&CallContext, Args) -> anyhow::Result<T> + Send + Sync;
type MethodFn<T> = dyn Fn(&mut T, &CallContext, Args) -> anyhow::Result<HostValue> + Send + Sync;

/// Describes how script sees a host type `T`: its constructors, instance
/// methods, static methods and optional interceptor.
///
/// Overloads sharing a name are grouped and tried in the order they were
/// added.
///
/// ```ignore
/// let class = HostClass::<Counter>::new("Counter")
///     .constructor(Signature::new([ParamKind::Int]), |_, args| Ok(Counter::new(args.i32(0)?)))
///     .method("add", Signature::new([ParamKind::Int]), |counter, _, args| {
///         counter.count += args.i32(0)?;
///         Ok(HostValue::Int(counter.count))
///     });
/// bridge::inject_class(&runtime, class)?;
/// ```
pub struct HostClass<T> {
    name: String,
    constructors: Vec<(Signature, Arc<ConstructorFn<T>>)>,
    methods: Vec<(String, Signature, Arc<MethodFn<T>>)>,
    statics: Vec<MethodDescriptor>,
    interceptor: Option<Arc<dyn ErasedInterceptor>>,
}

impl<T: Send + 'static> HostClass<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructors: Vec::new(),
            methods: Vec::new(),
            statics: Vec::new(),
            interceptor: None,
        }
    }

    /// Named after the type itself.
    pub fn named_after_type() -> Self {
        Self::new(short_type_name(type_name::<T>()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor<F>(mut self, signature: Signature, f: F) -> Self
    where
        F: Fn(&CallContext, Args) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.constructors.push((signature, Arc::new(f)));
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(&mut T, &CallContext, Args) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        self.methods.push((name.into(), signature, Arc::new(f)));
        self
    }

    /// Installed on the constructor function.
    pub fn static_method(mut self, descriptor: MethodDescriptor) -> Self {
        self.statics.push(descriptor);
        self
    }

    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: ClassInterceptor<T> + 'static,
    {
        self.interceptor = Some(Typed::<T, I>::erase(interceptor));
        self
    }

    pub(crate) fn erase(self) -> ClassProxy {
        let type_name = short_type_name(type_name::<T>());

        let constructors = self
            .constructors
            .into_iter()
            .map(|(signature, body)| Overload {
                signature,
                body: Arc::new(move |ctx: &CallContext, args: Args| {
                    body(ctx, args).map(|value| HostValue::Object(HostObject::new(value)))
                }),
            })
            .collect();

        let mut methods: Vec<MethodDescriptor> = Vec::new();
        for (name, signature, body) in self.methods {
            let overload = move |ctx: &CallContext, args: Args| -> anyhow::Result<HostValue> {
                let object = receiver_object(ctx, type_name)?;
                object.with_mut(|value: &mut T| body(value, ctx, args))?
            };
            match methods.iter_mut().position(|m| m.name() == name) {
                Some(index) => {
                    let existing = methods.remove(index);
                    methods.insert(index, existing.overload(signature, overload));
                }
                None => methods.push(MethodDescriptor::method(name).overload(signature, overload)),
            }
        }

        ClassProxy {
            name: self.name,
            type_id: TypeId::of::<T>(),
            type_name,
            constructors,
            methods,
            statics: self.statics,
            interceptor: self.interceptor,
            prototype: Mutex::new(None),
            methods_installed: AtomicBool::new(false),
            script_created: Mutex::new(Vec::new()),
            contexts: Mutex::new(HashMap::new()),
        }
    }
}

/// Host object behind the receiver of an instance method call.
fn receiver_object(ctx: &CallContext, type_name: &str) -> anyhow::Result<HostObject> {
    let runtime = ctx.runtime();
    match runtime.bridge().resolve(runtime.inner(), ctx.receiver())? {
        Resolved::Host(object) => Ok(object),
        Resolved::AgedOut => Err(Error::argument(crate::marshal::AGED_OUT).into()),
        Resolved::NotHost => Err(Error::argument(format!("Receiver of {} is not a {}", ctx.name(), type_name)).into()),
    }
}

impl<T> fmt::Debug for HostClass<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClass")
            .field("name", &self.name)
            .field("constructors", &self.constructors.len())
            .field("methods", &self.methods.len())
            .field("statics", &self.statics.len())
            .field("intercepted", &self.interceptor.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// A registered class within one runtime.
pub(crate) struct ClassProxy {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) constructors: Vec<Overload>,
    pub(crate) methods: Vec<MethodDescriptor>,
    pub(crate) statics: Vec<MethodDescriptor>,
    pub(crate) interceptor: Option<Arc<dyn ErasedInterceptor>>,
    /// Shared prototype carrying the instance methods. Uncounted; it lives as
    /// long as the isolate.
    pub(crate) prototype: Mutex<Option<NativeId>>,
    pub(crate) methods_installed: AtomicBool,
    /// Instances constructed from script and not yet released with `$release`.
    pub(crate) script_created: Mutex<Vec<HostObject>>,
    /// Last injected interceptor state, by object id.
    pub(crate) contexts: Mutex<HashMap<String, InterceptorContext>>,
}

impl ClassProxy {
    pub(crate) fn mark_methods_installed(&self) -> bool {
        !self.methods_installed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn forget_script_instance(&self, object: &HostObject) {
        self.script_created.lock().retain(|o| !o.ptr_eq(object));
    }

    pub(crate) fn unreleased(&self) -> usize {
        self.script_created.lock().len()
    }
}

impl fmt::Debug for ClassProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassProxy")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("unreleased", &self.unreleased())
            .finish()
    }
}
