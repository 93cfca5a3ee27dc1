//! The engine trait and the values that cross it.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use tether_types::{ReturnKind, ValueKind};

use crate::error::EngineError;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Identifies one isolate inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IsolateId(pub u64);

/// A native reference to a heap value, unique within its isolate.
///
/// Every reference the engine hands out must be released exactly once with
/// [`Engine::release_handle`]. Two references may point at the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub u64);

/// Index of a host callback registered with a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u32);

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isolate#{}", self.0)
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}

/// A freshly created isolate and a native reference to its global object.
#[derive(Debug, Clone, Copy)]
pub struct Isolate {
    pub id: IsolateId,
    pub global: NativeId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// A value crossing the boundary. Primitives travel by value, everything else
/// as a native reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    Double(f64),
    String(String),
    Ref { id: NativeId, kind: ValueKind },
}

impl EngineValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            EngineValue::Undefined => ValueKind::Undefined,
            EngineValue::Null => ValueKind::Null,
            EngineValue::Boolean(_) => ValueKind::Boolean,
            EngineValue::Integer(_) => ValueKind::Integer,
            EngineValue::Double(_) => ValueKind::Double,
            EngineValue::String(_) => ValueKind::String,
            EngineValue::Ref { kind, .. } => *kind,
        }
    }

    pub fn native_id(&self) -> Option<NativeId> {
        match self {
            EngineValue::Ref { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Name and starting line reported for a script in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOrigin {
    pub name: String,
    /// Added to the script's own (1-based) line numbers.
    pub line_offset: u32,
}

impl ScriptOrigin {
    pub fn new(name: impl Into<String>, line_offset: u32) -> Self {
        Self {
            name: name.into(),
            line_offset,
        }
    }
}

impl Default for ScriptOrigin {
    fn default() -> Self {
        Self::new("undefined", 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host re-entry
// ─────────────────────────────────────────────────────────────────────────────

/// A host callback failed. The engine throws `message` into script and keeps
/// `cause` so it can be surfaced if the throw is never caught.
#[derive(Debug, Clone)]
pub struct HostFault {
    pub message: String,
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl HostFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }
}

/// Entry point the engine uses when script calls a registered host callback.
///
/// `receiver` and every reference in `args` are fresh native references owned
/// by the host, which must release them. A reference in the returned value is
/// handed over to the engine, which releases it.
pub trait HostDispatch {
    fn dispatch(
        &self,
        callback: CallbackId,
        receiver: EngineValue,
        args: Vec<EngineValue>,
    ) -> Result<EngineValue, HostFault>;
}

/// Dispatcher for callers that never register callbacks.
pub struct NoHost;

impl HostDispatch for NoHost {
    fn dispatch(
        &self,
        callback: CallbackId,
        _receiver: EngineValue,
        _args: Vec<EngineValue>,
    ) -> Result<EngineValue, HostFault> {
        Err(HostFault::new(format!("No host attached for {}", callback)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// The primitive operations a script engine exposes to the host core.
///
/// Implementations are shared between threads, but the core guarantees that a
/// given isolate is only driven by the thread holding its locker. The only
/// primitive that may be called from any thread is
/// [`terminate_execution`](Engine::terminate_execution).
///
/// Values returned as [`EngineValue::Ref`] are new native references owned by
/// the caller. References passed in as arguments are borrowed.
pub trait Engine: Send + Sync {
    /// Allocate an isolate. When `global_alias` is set the global object is
    /// also reachable from script under that name.
    fn create_isolate(&self, global_alias: Option<&str>) -> Result<Isolate, EngineError>;

    /// Destroy an isolate and every reference into it.
    fn release_isolate(&self, isolate: IsolateId) -> Result<(), EngineError>;

    fn execute_script(
        &self,
        isolate: IsolateId,
        source: &str,
        origin: &ScriptOrigin,
        host: &dyn HostDispatch,
    ) -> Result<EngineValue, EngineError>;

    fn get_property(&self, isolate: IsolateId, object: NativeId, key: &str) -> Result<EngineValue, EngineError>;

    fn set_property(
        &self,
        isolate: IsolateId,
        object: NativeId,
        key: &str,
        value: &EngineValue,
    ) -> Result<(), EngineError>;

    /// Own enumerable keys in insertion order. Arrays list their indices first.
    fn property_keys(&self, isolate: IsolateId, object: NativeId) -> Result<Vec<String>, EngineError>;

    fn get_element(&self, isolate: IsolateId, array: NativeId, index: usize) -> Result<EngineValue, EngineError>;

    fn push_element(&self, isolate: IsolateId, array: NativeId, value: &EngineValue) -> Result<(), EngineError>;

    fn array_length(&self, isolate: IsolateId, array: NativeId) -> Result<usize, EngineError>;

    /// Call `function` with `receiver` as `this` (the global object when `None`).
    fn invoke_function(
        &self,
        isolate: IsolateId,
        function: NativeId,
        receiver: Option<NativeId>,
        args: &[EngineValue],
        host: &dyn HostDispatch,
    ) -> Result<EngineValue, EngineError>;

    fn new_object(&self, isolate: IsolateId) -> Result<NativeId, EngineError>;

    fn new_array(&self, isolate: IsolateId) -> Result<NativeId, EngineError>;

    fn release_handle(&self, isolate: IsolateId, handle: NativeId) -> Result<(), EngineError>;

    /// Install a function property `name` on `object` that re-enters the host
    /// through [`HostDispatch`] with `callback`.
    fn register_host_callback(
        &self,
        isolate: IsolateId,
        object: NativeId,
        name: &str,
        callback: CallbackId,
        returns: ReturnKind,
    ) -> Result<(), EngineError>;

    fn identity_equals(&self, isolate: IsolateId, a: NativeId, b: NativeId) -> Result<bool, EngineError>;

    fn identity_hash(&self, isolate: IsolateId, handle: NativeId) -> Result<u32, EngineError>;

    /// A second native reference to the same value.
    fn create_twin(&self, isolate: IsolateId, handle: NativeId) -> Result<NativeId, EngineError>;

    fn kind_of(&self, isolate: IsolateId, handle: NativeId) -> Result<ValueKind, EngineError>;

    fn set_prototype(&self, isolate: IsolateId, object: NativeId, prototype: NativeId) -> Result<(), EngineError>;

    /// Ask a running script to stop at its next safe point. Callable from any
    /// thread; best effort.
    fn terminate_execution(&self, isolate: IsolateId);

    /// Low memory notification. Unreachable values may be reclaimed.
    fn collect_garbage(&self, isolate: IsolateId) -> Result<(), EngineError>;
}
