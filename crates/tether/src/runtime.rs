//! Runtime manager.
//!
//! A [`Runtime`] owns one engine isolate. Every primitive goes through here so
//! the thread check, the live-handle count and the released flag are
//! enforced in one place.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tether_engine::{Engine, EngineValue, IsolateId, MemoryEngine, NativeId, ScriptOrigin};
use tether_types::ValueKind;

use crate::bridge::ObjectBridge;
use crate::concurrent::RuntimeDiagnostics;
use crate::config::{RuntimeConfig, ThreadMode};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::locker::Locker;
use crate::marshal::{CallbackRegistry, HandleScope, to_engine};
use crate::object::sealed::{Sealed, Target};
use crate::value::{HostValue, Value};

/// Runtimes created and not yet released, across the process.
static ACTIVE_RUNTIMES: AtomicUsize = AtomicUsize::new(0);

/// Thread bound by the first runtime created in [`ThreadMode::ProcessWide`].
static PROCESS_THREAD: OnceLock<ThreadId> = OnceLock::new();

/// Notified whenever a handle is created or released in a runtime.
pub trait ReferenceHandler: Send + Sync {
    fn handle_created(&self, handle: &Handle);
    fn handle_disposed(&self, id: NativeId);
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) isolate: IsolateId,
    /// Native reference to the global object. Owned by the runtime, not counted.
    pub(crate) global: NativeId,
    pub(crate) locker: Locker,
    pub(crate) callbacks: CallbackRegistry,
    pub(crate) bridge: ObjectBridge,
    pub(crate) self_ref: Weak<RuntimeInner>,
    object_references: AtomicUsize,
    released: AtomicBool,
    handlers: Mutex<Vec<(u64, Arc<dyn ReferenceHandler>)>>,
    next_handler: AtomicU64,
}

impl RuntimeInner {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Every operation touching the engine starts here.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_released() {
            return Err(Error::Released("Runtime"));
        }
        self.locker.check_thread()
    }

    pub(crate) fn handle(&self) -> Runtime {
        Runtime {
            inner: self.arc(),
        }
    }

    pub(crate) fn arc(&self) -> Arc<RuntimeInner> {
        // self_ref always upgrades while `&self` is reachable through an Arc
        match self.self_ref.upgrade() {
            Some(inner) => inner,
            None => unreachable!("runtime accessed during drop"),
        }
    }

    /// Count a native reference the engine just handed us.
    pub(crate) fn track(&self, id: NativeId, kind: ValueKind) -> Handle {
        let handle = Handle::from_native(self.self_ref.clone(), id, kind);
        self.object_references.fetch_add(1, Ordering::SeqCst);
        for handler in self.reference_handlers() {
            handler.handle_created(&handle);
        }
        handle
    }

    /// Called exactly once per tracked handle, when it is released.
    pub(crate) fn untrack(&self, id: NativeId) {
        self.object_references.fetch_sub(1, Ordering::SeqCst);
        for handler in self.reference_handlers() {
            handler.handle_disposed(id);
        }
    }

    fn reference_handlers(&self) -> Vec<Arc<dyn ReferenceHandler>> {
        self.handlers.lock().iter().map(|(_, h)| h.clone()).collect()
    }

    pub(crate) fn object_references(&self) -> usize {
        self.object_references.load(Ordering::SeqCst)
    }

    pub(crate) fn wrap(&self, value: EngineValue) -> Value {
        match value {
            EngineValue::Undefined => Value::Undefined,
            EngineValue::Null => Value::Null,
            EngineValue::Boolean(b) => Value::Boolean(b),
            EngineValue::Integer(i) => Value::Integer(i),
            EngineValue::Double(d) => Value::Double(d),
            EngineValue::String(s) => Value::String(s),
            EngineValue::Ref { id, kind } => Value::Handle(self.track(id, kind)),
        }
    }

    pub(crate) fn execute(&self, source: &str, origin: &ScriptOrigin) -> Result<Value> {
        self.check()?;
        tracing::trace!("[runtime:{}] execute {}", self.name(), origin.name);
        let result = self.engine.execute_script(self.isolate, source, origin, self)?;
        Ok(self.wrap(result))
    }

    /// Call a script function with host arguments.
    pub(crate) fn invoke(&self, function: NativeId, receiver: Option<NativeId>, args: &[HostValue]) -> Result<Value> {
        self.check()?;
        let mut temps = HandleScope::new();
        let converted = args
            .iter()
            .map(|arg| to_engine(self, arg, &mut temps))
            .collect::<Result<Vec<_>>>()?;
        let result = self
            .engine
            .invoke_function(self.isolate, function, receiver, &converted, self)?;
        Ok(self.wrap(result))
    }

    pub(crate) fn new_object(&self) -> Result<Handle> {
        self.check()?;
        let id = self.engine.new_object(self.isolate)?;
        Ok(self.track(id, ValueKind::Object))
    }

    pub(crate) fn new_array(&self) -> Result<Handle> {
        self.check()?;
        let id = self.engine.new_array(self.isolate)?;
        Ok(self.track(id, ValueKind::Array))
    }

    fn teardown(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bridge.teardown(self.name());
        drop(self.callbacks.take_all());
        self.handlers.lock().clear();
        if let Err(e) = self.engine.release_isolate(self.isolate) {
            tracing::warn!("[runtime:{}] releasing isolate failed: {}", self.name(), e);
        }
        ACTIVE_RUNTIMES.fetch_sub(1, Ordering::SeqCst);
        self.locker.clear();
        tracing::debug!("[runtime:{}] released", self.name());
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        if !self.is_released() {
            tracing::warn!(
                "[runtime:{}] dropped without release, {} handle(s) outstanding",
                self.name(),
                self.object_references()
            );
            self.teardown();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// One engine isolate plus the bookkeeping that keeps host and engine heaps
/// consistent.
///
/// Cloning shares the runtime. Handles refer back to it weakly, so they never
/// keep it alive.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with default settings on a fresh [`MemoryEngine`].
    pub fn create() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        Self::with_engine(Arc::new(MemoryEngine::new()), config)
    }

    /// Create a runtime on `engine`, owned by the calling thread.
    pub fn with_engine(engine: Arc<dyn Engine>, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let current = thread::current().id();
        let locker = match config.thread_mode {
            ThreadMode::PerRuntime => Locker::new(),
            ThreadMode::ProcessWide => {
                let bound = *PROCESS_THREAD.get_or_init(|| current);
                if bound != current {
                    return Err(Error::ThreadViolation);
                }
                Locker::pinned(bound)
            }
        };

        let isolate = engine.create_isolate(config.global_alias.as_deref())?;
        ACTIVE_RUNTIMES.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("[runtime:{}] created {}", config.name, isolate.id);

        let inner = Arc::new_cyclic(|self_ref| RuntimeInner {
            config,
            engine,
            isolate: isolate.id,
            global: isolate.global,
            locker,
            callbacks: CallbackRegistry::new(),
            bridge: ObjectBridge::new(),
            self_ref: self_ref.clone(),
            object_references: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(1),
        });
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }

    /// Runtimes created in this process and not yet released.
    pub fn active_runtimes() -> usize {
        ACTIVE_RUNTIMES.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn locker(&self) -> &Locker {
        &self.inner.locker
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    pub fn isolate(&self) -> IsolateId {
        self.inner.isolate
    }

    pub fn bridge(&self) -> &ObjectBridge {
        &self.inner.bridge
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_released()
    }

    /// Handles created from this runtime and not yet released.
    pub fn object_reference_count(&self) -> usize {
        self.inner.object_references()
    }

    // ── lifecycle ────────────────────────────────────────────────────────────

    /// Destroy the isolate. With leak reporting enabled (the default) this
    /// fails while handles are outstanding and leaves the runtime usable.
    pub fn release(&self) -> Result<()> {
        self.release_with(self.inner.config.report_leaks)
    }

    /// Release, optionally tearing down even with outstanding handles.
    /// Releasing twice is a no-op.
    pub fn release_with(&self, report_leaks: bool) -> Result<()> {
        if self.inner.is_released() {
            return Ok(());
        }
        self.inner.locker.check_thread()?;
        let outstanding = self.inner.object_references();
        if outstanding > 0 {
            if report_leaks {
                return Err(Error::OutstandingHandles(outstanding));
            }
            tracing::warn!(
                "[runtime:{}] releasing with {} handle(s) outstanding",
                self.name(),
                outstanding
            );
        }
        self.inner.teardown();
        Ok(())
    }

    pub fn add_reference_handler(&self, handler: Arc<dyn ReferenceHandler>) -> u64 {
        let id = self.inner.next_handler.fetch_add(1, Ordering::SeqCst);
        self.inner.handlers.lock().push((id, handler));
        id
    }

    pub fn remove_reference_handler(&self, id: u64) {
        self.inner.handlers.lock().retain(|(h, _)| *h != id);
    }

    /// Thread-safe handle for stopping a running script.
    pub fn termination_handle(&self) -> TerminationHandle {
        TerminationHandle {
            engine: self.inner.engine.clone(),
            isolate: self.inner.isolate,
        }
    }

    /// Ask the engine to stop the running script. May be called from any thread.
    pub fn terminate_execution(&self) {
        self.inner.engine.terminate_execution(self.inner.isolate);
    }

    /// Low memory notification.
    pub fn collect_garbage(&self) -> Result<()> {
        self.inner.check()?;
        self.inner.engine.collect_garbage(self.inner.isolate)?;
        Ok(())
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        RuntimeDiagnostics {
            name: self.name().to_string(),
            released: self.is_released(),
            object_references: self.object_reference_count(),
            owned: self.inner.locker.owner().is_some(),
            callbacks: self.inner.callbacks.len(),
            bridged_objects: self.inner.bridge.entry_count(),
        }
    }

    // ── handles ──────────────────────────────────────────────────────────────

    pub fn undefined(&self) -> Handle {
        Handle::undefined()
    }

    pub fn new_object(&self) -> Result<Handle> {
        self.inner.new_object()
    }

    pub fn new_array(&self) -> Result<Handle> {
        self.inner.new_array()
    }

    /// New array filled with `items`.
    pub fn new_array_from<I>(&self, items: I) -> Result<Handle>
    where
        I: IntoIterator,
        I::Item: Into<HostValue>,
    {
        let array = self.inner.new_array()?;
        let mut temps = HandleScope::new();
        for item in items {
            let value = to_engine(&self.inner, &item.into(), &mut temps);
            let pushed = value.and_then(|v| {
                self.inner
                    .engine
                    .push_element(self.inner.isolate, array.native_id_or_err()?, &v)
                    .map_err(Error::from)
            });
            if let Err(e) = pushed {
                let _ = array.release();
                return Err(e);
            }
        }
        Ok(array)
    }

    /// A counted handle to the global object.
    pub fn global_object(&self) -> Result<Handle> {
        self.inner.check()?;
        let id = self.inner.engine.create_twin(self.inner.isolate, self.inner.global)?;
        Ok(self.inner.track(id, ValueKind::Object))
    }

    // ── execution ────────────────────────────────────────────────────────────

    pub fn execute_script(&self, source: &str) -> Result<Value> {
        self.inner.execute(source, &ScriptOrigin::default())
    }

    pub fn execute_script_at(&self, source: &str, origin: &ScriptOrigin) -> Result<Value> {
        self.inner.execute(source, origin)
    }

    /// Execute and check the result against `expected`.
    ///
    /// `ValueKind::Undefined` means the result is discarded. `null` or
    /// `undefined` where a value is required is an undefined-result error; any
    /// other kind mismatch is a type-mismatch error.
    pub fn execute_expecting(&self, source: &str, origin: &ScriptOrigin, expected: ValueKind) -> Result<Value> {
        let value = self.inner.execute(source, origin)?;
        expect_result(value, expected)
    }

    pub fn execute_integer_script(&self, source: &str) -> Result<i32> {
        let value = self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::Integer)?;
        value
            .as_i32()
            .ok_or_else(|| Error::mismatch(ValueKind::Integer, value.kind()))
    }

    pub fn execute_double_script(&self, source: &str) -> Result<f64> {
        let value = self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::Double)?;
        value
            .as_f64()
            .ok_or_else(|| Error::mismatch(ValueKind::Double, value.kind()))
    }

    pub fn execute_boolean_script(&self, source: &str) -> Result<bool> {
        let value = self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::Boolean)?;
        value
            .as_bool()
            .ok_or_else(|| Error::mismatch(ValueKind::Boolean, value.kind()))
    }

    pub fn execute_string_script(&self, source: &str) -> Result<String> {
        let value = self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::String)?;
        let kind = value.kind();
        value
            .into_string()
            .ok_or_else(|| Error::mismatch(ValueKind::String, kind))
    }

    /// Objects, arrays and functions all satisfy an object expectation.
    pub fn execute_object_script(&self, source: &str) -> Result<Handle> {
        let value = self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::Object)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Object, kind))
    }

    pub fn execute_array_script(&self, source: &str) -> Result<Handle> {
        let value = self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::Array)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Array, kind))
    }

    pub fn execute_void_script(&self, source: &str) -> Result<()> {
        self.execute_expecting(source, &ScriptOrigin::default(), ValueKind::Undefined)?;
        Ok(())
    }
}

impl Sealed for Runtime {
    fn target(&self) -> Result<Target> {
        self.inner.check()?;
        Ok(Target {
            runtime: self.inner.clone(),
            id: self.inner.global,
            kind: ValueKind::Object,
        })
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name())
            .field("isolate", &self.inner.isolate)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Check a result against the expected kind, see
/// [`Runtime::execute_expecting`].
pub(crate) fn expect_result(value: Value, expected: ValueKind) -> Result<Value> {
    if expected == ValueKind::Undefined {
        value.release()?;
        return Ok(Value::Undefined);
    }
    let actual = value.kind();
    if actual.is_absent() {
        return Err(Error::UndefinedResult { expected });
    }
    let accepted = match (expected, &value) {
        (ValueKind::Integer, Value::Double(d)) if d.fract() == 0.0 && *d >= i32::MIN as f64 && *d <= i32::MAX as f64 => {
            return Ok(Value::Integer(*d as i32));
        }
        (ValueKind::Double, Value::Integer(i)) => return Ok(Value::Double(*i as f64)),
        (ValueKind::Object, _) => matches!(actual, ValueKind::Object | ValueKind::Array | ValueKind::Function),
        _ => actual == expected,
    };
    if accepted {
        Ok(value)
    } else {
        let _ = value.release();
        Err(Error::mismatch(expected, actual))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Termination
// ─────────────────────────────────────────────────────────────────────────────

/// Stops scripts running in a runtime from any thread.
#[derive(Clone)]
pub struct TerminationHandle {
    engine: Arc<dyn Engine>,
    isolate: IsolateId,
}

impl TerminationHandle {
    /// Best effort: the script stops at its next safe point.
    pub fn terminate(&self) {
        self.engine.terminate_execution(self.isolate);
    }
}

impl fmt::Debug for TerminationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminationHandle")
            .field("isolate", &self.isolate)
            .finish()
    }
}

#[cfg(test)]
mod tests;
