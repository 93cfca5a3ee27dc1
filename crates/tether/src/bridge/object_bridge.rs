//! Identifier table linking script proxies to host objects.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_engine::{EngineValue, NativeId};
use tether_types::{ReturnKind, ValueKind};
use uuid::Uuid;

use super::class::ClassProxy;
use super::{HostObject, InterceptorContext, WeakHostObject};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::marshal::{CallContext, MethodDescriptor, first_fit};
use crate::object::ObjectLike;
use crate::runtime::RuntimeInner;
use crate::utils::object_utils;
use crate::value::{HostValue, Value};

/// Property on every proxy holding its object id.
pub const OBJECT_ID_KEY: &str = "__hostObjectId";

/// What a script value turned out to be when asked for its host object.
#[derive(Debug)]
pub enum Resolved {
    Host(HostObject),
    /// The value carries no object id.
    NotHost,
    /// The value carries an id whose host object is gone.
    AgedOut,
}

struct Entry {
    object: WeakHostObject,
}

#[derive(Default)]
struct BridgeState {
    classes: HashMap<TypeId, Arc<ClassProxy>>,
    entries: HashMap<String, Entry>,
    /// Host object address → id, for reusing an existing proxy.
    ids: HashMap<usize, String>,
    /// Uncounted object mapping id → proxy.
    proxies: Option<NativeId>,
    /// Ids swept from `entries` whose proxy mapping is still to be cleared.
    stale: Vec<String>,
}

impl BridgeState {
    /// Drop every entry whose host object is gone.
    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        let mut dead = Vec::new();
        self.entries.retain(|id, entry| {
            let alive = entry.object.is_alive();
            if !alive {
                dead.push(id.clone());
            }
            alive
        });
        let entries = &self.entries;
        self.ids.retain(|_, id| entries.contains_key(id));
        self.stale.extend(dead);
        before - self.entries.len()
    }
}

/// Per-runtime object bridge: registered classes plus the weak table from
/// object ids to host objects.
///
/// The table is swept lazily. A lookup that misses purges every entry whose
/// host object has been dropped; there is no background sweeper.
pub struct ObjectBridge {
    state: Mutex<BridgeState>,
}

impl ObjectBridge {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState::default()),
        }
    }

    /// Live and not-yet-swept entries.
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.state.lock().classes.contains_key(&TypeId::of::<T>())
    }

    /// Host object for `id`. A miss sweeps stale entries.
    pub fn lookup(&self, id: &str) -> Option<HostObject> {
        let mut state = self.state.lock();
        if let Some(object) = state.entries.get(id).and_then(|e| e.object.upgrade()) {
            return Some(object);
        }
        let swept = state.sweep();
        if swept > 0 {
            tracing::trace!("[bridge] swept {} stale entr(ies) after miss on {}", swept, id);
        }
        None
    }

    /// Id of the proxy already bridging `object`, if any.
    pub fn id_of(&self, object: &HostObject) -> Option<String> {
        let state = self.state.lock();
        let id = state.ids.get(&object.address())?;
        let entry = state.entries.get(id)?;
        match entry.object.upgrade() {
            Some(existing) if existing.ptr_eq(object) => Some(id.clone()),
            _ => None,
        }
    }

    /// `(class name, count)` for classes with script-constructed instances
    /// that were never released with `$release`.
    pub fn unreleased_instances(&self) -> Vec<(String, usize)> {
        let classes: Vec<_> = self.state.lock().classes.values().cloned().collect();
        classes
            .iter()
            .filter(|c| c.unreleased() > 0)
            .map(|c| (c.name.clone(), c.unreleased()))
            .collect()
    }

    pub(crate) fn class(&self, type_id: TypeId) -> Option<Arc<ClassProxy>> {
        self.state.lock().classes.get(&type_id).cloned()
    }

    /// What `handle` stands for on the host side.
    pub(crate) fn resolve(&self, runtime: &RuntimeInner, handle: &Handle) -> Result<Resolved> {
        if handle.is_undefined() {
            return Ok(Resolved::NotHost);
        }
        let (_, id) = handle.resolve()?;
        match runtime.engine.get_property(runtime.isolate, id, OBJECT_ID_KEY)? {
            EngineValue::String(object_id) => Ok(match self.lookup(&object_id) {
                Some(object) => Resolved::Host(object),
                None => Resolved::AgedOut,
            }),
            EngineValue::Ref { id, .. } => {
                runtime.engine.release_handle(runtime.isolate, id)?;
                Ok(Resolved::NotHost)
            }
            _ => Ok(Resolved::NotHost),
        }
    }

    // ── classes ──────────────────────────────────────────────────────────────

    /// Register `class` and install its constructor as `class.name` on `root`.
    pub(crate) fn register_class(&self, runtime: &RuntimeInner, class: ClassProxy, root: NativeId) -> Result<()> {
        if self.state.lock().classes.contains_key(&class.type_id) {
            return Err(Error::argument(format!("Host class {} is already registered", class.name)));
        }

        let prototype = runtime.engine.new_object(runtime.isolate)?;
        *class.prototype.lock() = Some(prototype);
        let class = Arc::new(class);
        self.state.lock().classes.insert(class.type_id, class.clone());

        install(runtime, prototype, release_method())?;

        let constructing = class.clone();
        let constructor =
            MethodDescriptor::callback(class.name.clone(), move |ctx| construct(ctx, &constructing));
        install(runtime, root, constructor)?;

        let EngineValue::Ref { id: function, .. } = runtime.engine.get_property(runtime.isolate, root, &class.name)?
        else {
            return Err(Error::argument(format!("Constructor {} was not installed", class.name)));
        };
        let installed = (|| -> Result<()> {
            let proto = EngineValue::Ref {
                id: prototype,
                kind: ValueKind::Object,
            };
            runtime
                .engine
                .set_property(runtime.isolate, function, "prototype", &proto)?;
            for method in &class.statics {
                install(runtime, function, method.clone())?;
            }
            Ok(())
        })();
        runtime.engine.release_handle(runtime.isolate, function)?;
        installed?;

        tracing::debug!(
            "[bridge] registered class {} ({} method(s), {} static)",
            class.name,
            class.methods.len(),
            class.statics.len()
        );
        Ok(())
    }

    // ── proxies ──────────────────────────────────────────────────────────────

    /// Link `object` to `proxy` and mint its id.
    pub(crate) fn attach(
        &self,
        runtime: &RuntimeInner,
        proxy: &Handle,
        object: &HostObject,
        class: &Arc<ClassProxy>,
    ) -> Result<String> {
        if object.value_type() != class.type_id {
            return Err(Error::argument(format!(
                "Cannot attach host object of type [{}] using proxy for type [{}]",
                object.type_name(),
                class.type_name
            )));
        }

        let prototype = (*class.prototype.lock()).ok_or(Error::Released("Class prototype"))?;
        if class.mark_methods_installed() {
            for method in &class.methods {
                install(runtime, prototype, method.clone())?;
            }
        }

        let proxy_id = proxy.native_id_or_err()?;
        runtime.engine.set_prototype(runtime.isolate, proxy_id, prototype)?;

        let id = format!("OHID{}", Uuid::new_v4().simple());
        runtime
            .engine
            .set_property(runtime.isolate, proxy_id, OBJECT_ID_KEY, &EngineValue::String(id.clone()))?;
        let proxies = self.proxies(runtime)?;
        runtime.engine.set_property(
            runtime.isolate,
            proxies,
            &id,
            &EngineValue::Ref {
                id: proxy_id,
                kind: ValueKind::Object,
            },
        )?;

        {
            let mut state = self.state.lock();
            state.entries.insert(
                id.clone(),
                Entry {
                    object: object.downgrade(),
                },
            );
            state.ids.insert(object.address(), id.clone());
        }
        tracing::trace!("[bridge] attached {} as {}", class.type_name, id);

        if class.interceptor.is_some() {
            self.write_injected(runtime, proxy, object, class, &id)?;
        }
        Ok(id)
    }

    /// The proxy for `object`, reusing the existing one when the object is
    /// already bridged. The returned handle is counted.
    pub(crate) fn proxy_for(&self, runtime: &RuntimeInner, object: &HostObject) -> Result<Handle> {
        self.unlink_stale(runtime)?;
        let class = self.class(object.value_type()).ok_or_else(|| {
            Error::argument(format!("No host class registered for type [{}]", object.type_name()))
        })?;

        if let Some(id) = self.id_of(object) {
            let proxies = self.proxies(runtime)?;
            if let EngineValue::Ref { id: existing, kind } = runtime.engine.get_property(runtime.isolate, proxies, &id)? {
                let proxy = runtime.track(existing, kind);
                if class.interceptor.is_some() {
                    self.write_injected(runtime, &proxy, object, &class, &id)?;
                }
                return Ok(proxy);
            }
        }

        let proxy = runtime.new_object()?;
        if let Err(e) = self.attach(runtime, &proxy, object, &class) {
            let _ = proxy.release();
            return Err(e);
        }
        Ok(proxy)
    }

    fn proxies(&self, runtime: &RuntimeInner) -> Result<NativeId> {
        if let Some(id) = self.state.lock().proxies {
            return Ok(id);
        }
        let id = runtime.engine.new_object(runtime.isolate)?;
        self.state.lock().proxies = Some(id);
        Ok(id)
    }

    fn unlink_stale(&self, runtime: &RuntimeInner) -> Result<()> {
        let (stale, proxies) = {
            let mut state = self.state.lock();
            (std::mem::take(&mut state.stale), state.proxies)
        };
        let Some(proxies) = proxies else {
            return Ok(());
        };
        for id in stale {
            runtime
                .engine
                .set_property(runtime.isolate, proxies, &id, &EngineValue::Undefined)?;
        }
        Ok(())
    }

    // ── interceptors ─────────────────────────────────────────────────────────

    fn write_injected(
        &self,
        runtime: &RuntimeInner,
        proxy: &Handle,
        object: &HostObject,
        class: &ClassProxy,
        id: &str,
    ) -> Result<()> {
        let Some(interceptor) = &class.interceptor else {
            return Ok(());
        };
        let context = interceptor.inject(object)?;
        let rt = runtime.handle();
        for (key, value) in &context {
            let value = object_utils::from_json(&rt, value)?;
            let set = proxy.set(key, value.clone());
            value.release()?;
            set?;
        }
        if proxy.type_of("onInject")? == ValueKind::Function {
            let argument = object_utils::from_json(&rt, &serde_json::Value::Object(context.clone()))?;
            let called = proxy.execute_void_function("onInject", vec![HostValue::from(argument.clone())]);
            argument.release()?;
            called?;
        }
        class.contexts.lock().insert(id.to_string(), context);
        Ok(())
    }

    /// Copy intercepted state from `proxy` back into `object`.
    pub(crate) fn read_injected(&self, runtime: &RuntimeInner, proxy: &Handle, object: &HostObject) -> Result<()> {
        let Some(class) = self.class(object.value_type()) else {
            return Ok(());
        };
        let Some(interceptor) = &class.interceptor else {
            return Ok(());
        };
        let Some(id) = self.id_of(object) else {
            return Ok(());
        };
        let known = class.contexts.lock().get(&id).cloned().unwrap_or_default();

        let rt = runtime.handle();
        let mut context = InterceptorContext::new();
        if proxy.type_of("onExtract")? == ValueKind::Function {
            let scratch = object_utils::from_json(&rt, &serde_json::Value::Object(known.clone()))?;
            let result = (|| -> Result<()> {
                let Value::Handle(scratch) = &scratch else {
                    return Ok(());
                };
                proxy.execute_void_function("onExtract", vec![HostValue::from(scratch)])?;
                read_keys(scratch, known.keys(), &mut context)
            })();
            scratch.release()?;
            result?;
        } else {
            read_keys(proxy, known.keys(), &mut context)?;
        }

        interceptor.extract(&context, object)?;
        class.contexts.lock().insert(id, context);
        Ok(())
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    /// Report unreleased script instances and forget everything.
    pub(crate) fn teardown(&self, runtime_name: &str) {
        for (class, count) in self.unreleased_instances() {
            tracing::warn!(
                "[bridge] {} instance(s) of {} were created from script in {} and not released via $release",
                count,
                class,
                runtime_name
            );
        }
        let state = std::mem::take(&mut *self.state.lock());
        drop(state);
    }
}

impl fmt::Debug for ObjectBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectBridge")
            .field("classes", &state.classes.len())
            .field("entries", &state.entries.len())
            .finish()
    }
}

fn read_keys<'k>(
    source: &Handle,
    keys: impl Iterator<Item = &'k String>,
    context: &mut InterceptorContext,
) -> Result<()> {
    for key in keys {
        let value = source.get(key)?;
        let json = object_utils::to_json(&value);
        value.release()?;
        context.insert(key.clone(), json?);
    }
    Ok(())
}

/// Register `descriptor` as a host callback on a raw native object.
fn install(runtime: &RuntimeInner, object: NativeId, descriptor: MethodDescriptor) -> Result<()> {
    let name = descriptor.name().to_string();
    let returns = descriptor.return_kind();
    let callback = runtime.callbacks.register(descriptor);
    runtime
        .engine
        .register_host_callback(runtime.isolate, object, &name, callback, returns)?;
    Ok(())
}

/// `$release()` on a script-constructed instance: drop it from the
/// unreleased list. Returns the receiver.
fn release_method() -> MethodDescriptor {
    MethodDescriptor::callback("$release", |ctx| {
        let runtime = ctx.runtime();
        if let Resolved::Host(object) = runtime.bridge().resolve(runtime.inner(), ctx.receiver())? {
            if let Some(class) = runtime.bridge().class(object.value_type()) {
                class.forget_script_instance(&object);
            }
        }
        Ok(HostValue::Handle(ctx.receiver().clone()))
    })
    .returns(ReturnKind::Object)
}

/// Body of a generated constructor, called as `new Name(...)`.
fn construct(ctx: &CallContext, class: &Arc<ClassProxy>) -> anyhow::Result<HostValue> {
    let runtime = ctx.runtime().inner();
    let receiver = ctx.receiver();
    let called_plainly = match receiver.native_id() {
        None => true,
        Some(id) => runtime.engine.identity_equals(runtime.isolate, id, runtime.global)?,
    };
    if called_plainly {
        anyhow::bail!("{} must be called with new", class.name);
    }

    let (overload, args, temps) = match first_fit(runtime, ctx, &class.constructors) {
        Ok(found) => found,
        Err(Error::NoMatchingSignature { .. }) => {
            return Err(Error::argument(format!(
                "No constructor exists for {} with specified arguments.",
                class.name
            ))
            .into());
        }
        Err(e) => return Err(e.into()),
    };
    let created = (overload.body)(ctx, args);
    drop(temps);
    let HostValue::Object(object) = created? else {
        anyhow::bail!("Constructor for {} produced no host object", class.name);
    };

    runtime.bridge.attach(runtime, receiver, &object, class)?;
    class.script_created.lock().push(object);
    Ok(HostValue::Undefined)
}
