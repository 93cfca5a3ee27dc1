//! In-process implementation of the engine boundary.
//!
//! `MemoryEngine` keeps one slot heap per isolate behind a mutex that is never
//! held while a program body or a host callback runs, so host callbacks may
//! re-enter the engine freely.

mod eval;
mod heap;
mod scope;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tether_types::{ReturnKind, ValueKind};

use crate::engine::{CallbackId, Engine, EngineValue, HostDispatch, Isolate, IsolateId, NativeId, ScriptOrigin};
use crate::error::EngineError;

pub use heap::{Local, ObjectRef};
pub use scope::{Program, Scope, Throw};

use heap::{FunctionBody, Heap, SlotKind};
use scope::{ScriptInfo, invoke_body};

pub(crate) struct IsolateState {
    pub id: IsolateId,
    pub heap: Mutex<Heap>,
    pub terminating: AtomicBool,
    depth: AtomicUsize,
}

/// Marks an isolate as executing. The outermost exit clears any pending
/// termination request.
struct Execution<'a>(&'a IsolateState);

impl<'a> Execution<'a> {
    fn enter(state: &'a IsolateState) -> Self {
        state.depth.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for Execution<'_> {
    fn drop(&mut self) {
        if self.0.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.terminating.store(false, Ordering::SeqCst);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Engine whose scripts are Rust programs registered by source text.
pub struct MemoryEngine {
    isolates: Mutex<HashMap<IsolateId, Arc<IsolateState>>>,
    programs: RwLock<HashMap<String, Program>>,
    next_isolate: AtomicU64,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            isolates: Mutex::new(HashMap::new()),
            programs: RwLock::new(HashMap::new()),
            next_isolate: AtomicU64::new(1),
        }
    }

    /// Register the program run when `source` is executed. Matching ignores
    /// surrounding whitespace. Registering the same source again replaces it.
    pub fn define_script<F>(&self, source: &str, program: F)
    where
        F: Fn(&Scope<'_>) -> Result<Local, Throw> + Send + Sync + 'static,
    {
        self.programs
            .write()
            .insert(source.trim().to_string(), Arc::new(program));
    }

    /// Native references the host has not released yet.
    pub fn live_handles(&self, isolate: IsolateId) -> usize {
        self.state(isolate)
            .map(|s| s.heap.lock().live_handles())
            .unwrap_or(0)
    }

    /// Number of allocated heap slots, including the global object.
    pub fn heap_size(&self, isolate: IsolateId) -> usize {
        self.state(isolate)
            .map(|s| s.heap.lock().slot_count())
            .unwrap_or(0)
    }

    pub fn isolate_count(&self) -> usize {
        self.isolates.lock().len()
    }

    fn state(&self, isolate: IsolateId) -> Result<Arc<IsolateState>, EngineError> {
        self.isolates
            .lock()
            .get(&isolate)
            .cloned()
            .ok_or(EngineError::UnknownIsolate(isolate))
    }

    fn expect_kind(heap: &Heap, id: NativeId, expected: ValueKind) -> Result<ObjectRef, EngineError> {
        let r = heap.resolve(id)?;
        let actual = heap.kind(r);
        let matches = match expected {
            ValueKind::Object => matches!(actual, ValueKind::Object | ValueKind::Array | ValueKind::Function),
            other => actual == other,
        };
        if matches {
            Ok(r)
        } else {
            Err(EngineError::WrongKind {
                handle: id,
                expected,
                actual,
            })
        }
    }
}

impl Engine for MemoryEngine {
    fn create_isolate(&self, global_alias: Option<&str>) -> Result<Isolate, EngineError> {
        let id = IsolateId(self.next_isolate.fetch_add(1, Ordering::SeqCst));
        let mut heap = Heap::new();
        let global = heap.global;
        if let Some(alias) = global_alias {
            heap.set(global, alias, Local::Ref(global));
        }
        let global_handle = heap.new_handle(global);

        let state = Arc::new(IsolateState {
            id,
            heap: Mutex::new(heap),
            terminating: AtomicBool::new(false),
            depth: AtomicUsize::new(0),
        });
        self.isolates.lock().insert(id, state);
        tracing::debug!("[memory] created {}", id);

        Ok(Isolate {
            id,
            global: global_handle,
        })
    }

    fn release_isolate(&self, isolate: IsolateId) -> Result<(), EngineError> {
        self.isolates
            .lock()
            .remove(&isolate)
            .ok_or(EngineError::UnknownIsolate(isolate))?;
        tracing::debug!("[memory] released {}", isolate);
        Ok(())
    }

    fn execute_script(
        &self,
        isolate: IsolateId,
        source: &str,
        origin: &ScriptOrigin,
        host: &dyn HostDispatch,
    ) -> Result<EngineValue, EngineError> {
        let state = self.state(isolate)?;
        let script = ScriptInfo::new(&origin.name, origin.line_offset, source);
        let program = self.programs.read().get(source.trim()).cloned();

        let _execution = Execution::enter(&state);
        let global = Local::Ref(state.heap.lock().global);
        let scope = Scope::new(&state, host, script.clone(), global, Vec::new());

        let result = match program {
            Some(program) => program(&scope),
            None => match eval::evaluate(&scope, source) {
                Some(result) => result,
                None => return Err(EngineError::Script(eval::syntax_error(&script))),
            },
        };
        match result {
            Ok(value) => Ok(state.heap.lock().export(&value)),
            Err(throw) => Err(throw.into_engine_error(&script)),
        }
    }

    fn get_property(&self, isolate: IsolateId, object: NativeId, key: &str) -> Result<EngineValue, EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = Self::expect_kind(&heap, object, ValueKind::Object)?;
        let value = heap.get(r, key);
        Ok(heap.export(&value))
    }

    fn set_property(
        &self,
        isolate: IsolateId,
        object: NativeId,
        key: &str,
        value: &EngineValue,
    ) -> Result<(), EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = Self::expect_kind(&heap, object, ValueKind::Object)?;
        let value = heap.import_borrowed(value)?;
        heap.set(r, key, value);
        Ok(())
    }

    fn property_keys(&self, isolate: IsolateId, object: NativeId) -> Result<Vec<String>, EngineError> {
        let state = self.state(isolate)?;
        let heap = state.heap.lock();
        let r = Self::expect_kind(&heap, object, ValueKind::Object)?;
        Ok(heap.keys(r))
    }

    fn get_element(&self, isolate: IsolateId, array: NativeId, index: usize) -> Result<EngineValue, EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = Self::expect_kind(&heap, array, ValueKind::Array)?;
        let value = heap.element(r, index);
        Ok(heap.export(&value))
    }

    fn push_element(&self, isolate: IsolateId, array: NativeId, value: &EngineValue) -> Result<(), EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = Self::expect_kind(&heap, array, ValueKind::Array)?;
        let value = heap.import_borrowed(value)?;
        heap.push(r, value);
        Ok(())
    }

    fn array_length(&self, isolate: IsolateId, array: NativeId) -> Result<usize, EngineError> {
        let state = self.state(isolate)?;
        let heap = state.heap.lock();
        let r = Self::expect_kind(&heap, array, ValueKind::Array)?;
        Ok(heap.length(r))
    }

    fn invoke_function(
        &self,
        isolate: IsolateId,
        function: NativeId,
        receiver: Option<NativeId>,
        args: &[EngineValue],
        host: &dyn HostDispatch,
    ) -> Result<EngineValue, EngineError> {
        let state = self.state(isolate)?;
        let (body, this, args) = {
            let heap = state.heap.lock();
            let f = heap.resolve(function)?;
            let body = heap.function_body(f).ok_or(EngineError::NotCallable)?;
            let this = match receiver {
                Some(id) => Local::Ref(heap.resolve(id)?),
                None => Local::Ref(heap.global),
            };
            let args = args
                .iter()
                .map(|a| heap.import_borrowed(a))
                .collect::<Result<Vec<_>, _>>()?;
            (body, this, args)
        };
        let fallback = match &body {
            FunctionBody::Program { script, .. } => script.clone(),
            FunctionBody::Host { .. } => ScriptInfo::native(),
        };

        let _execution = Execution::enter(&state);
        match invoke_body(&state, host, body, this, args, None) {
            Ok(value) => Ok(state.heap.lock().export(&value)),
            Err(throw) => Err(throw.into_engine_error(&fallback)),
        }
    }

    fn new_object(&self, isolate: IsolateId) -> Result<NativeId, EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = heap.alloc(SlotKind::Object);
        Ok(heap.new_handle(r))
    }

    fn new_array(&self, isolate: IsolateId) -> Result<NativeId, EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = heap.alloc(SlotKind::Array);
        Ok(heap.new_handle(r))
    }

    fn release_handle(&self, isolate: IsolateId, handle: NativeId) -> Result<(), EngineError> {
        let state = self.state(isolate)?;
        state.heap.lock().drop_handle(handle)?;
        Ok(())
    }

    fn register_host_callback(
        &self,
        isolate: IsolateId,
        object: NativeId,
        name: &str,
        callback: CallbackId,
        returns: ReturnKind,
    ) -> Result<(), EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let target = Self::expect_kind(&heap, object, ValueKind::Object)?;
        let function = heap.alloc(SlotKind::Function(FunctionBody::Host { callback, returns }));
        heap.set(target, name, Local::Ref(function));
        Ok(())
    }

    fn identity_equals(&self, isolate: IsolateId, a: NativeId, b: NativeId) -> Result<bool, EngineError> {
        let state = self.state(isolate)?;
        let heap = state.heap.lock();
        Ok(heap.resolve(a)? == heap.resolve(b)?)
    }

    fn identity_hash(&self, isolate: IsolateId, handle: NativeId) -> Result<u32, EngineError> {
        let state = self.state(isolate)?;
        let heap = state.heap.lock();
        let r = heap.resolve(handle)?;
        Ok(heap.hash(r))
    }

    fn create_twin(&self, isolate: IsolateId, handle: NativeId) -> Result<NativeId, EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let r = heap.resolve(handle)?;
        Ok(heap.new_handle(r))
    }

    fn kind_of(&self, isolate: IsolateId, handle: NativeId) -> Result<ValueKind, EngineError> {
        let state = self.state(isolate)?;
        let heap = state.heap.lock();
        let r = heap.resolve(handle)?;
        Ok(heap.kind(r))
    }

    fn set_prototype(&self, isolate: IsolateId, object: NativeId, prototype: NativeId) -> Result<(), EngineError> {
        let state = self.state(isolate)?;
        let mut heap = state.heap.lock();
        let target = Self::expect_kind(&heap, object, ValueKind::Object)?;
        let prototype = Self::expect_kind(&heap, prototype, ValueKind::Object)?;
        if let Some(slot) = heap.slot_mut(target) {
            slot.prototype = Some(prototype);
        }
        Ok(())
    }

    fn terminate_execution(&self, isolate: IsolateId) {
        if let Ok(state) = self.state(isolate) {
            state.terminating.store(true, Ordering::SeqCst);
            tracing::debug!("[memory] termination requested for {}", isolate);
        }
    }

    fn collect_garbage(&self, isolate: IsolateId) -> Result<(), EngineError> {
        let state = self.state(isolate)?;
        if state.depth.load(Ordering::SeqCst) > 0 {
            tracing::trace!("[memory] {} is executing, collection deferred", isolate);
            return Ok(());
        }
        let reclaimed = state.heap.lock().collect();
        tracing::trace!("[memory] {} reclaimed {} slot(s)", isolate, reclaimed);
        Ok(())
    }
}
