//! Callback descriptors and the per-runtime table the engine dispatches into.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_engine::CallbackId;
use tether_types::ReturnKind;

use super::{ScriptFunction, Signature};
use crate::bridge::HostObject;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::runtime::Runtime;
use crate::value::{HostValue, Value};

pub(crate) type RawFn = dyn Fn(&CallContext) -> anyhow::Result<HostValue> + Send + Sync;
pub(crate) type OverloadFn = dyn Fn(&CallContext, Args) -> anyhow::Result<HostValue> + Send + Sync;

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct Overload {
    pub(crate) signature: Signature,
    pub(crate) body: Arc<OverloadFn>,
}

#[derive(Clone)]
pub(crate) enum Target {
    /// Receives the script arguments untouched.
    Raw(Arc<RawFn>),
    /// Arguments are coerced against each signature in order; first fit wins.
    Overloads(Vec<Overload>),
}

/// A host method as registered with script: a name, a declared return kind
/// and either a raw callback or an ordered overload set.
///
/// ```ignore
/// let add = MethodDescriptor::method("add")
///     .overload(Signature::new([ParamKind::Int, ParamKind::Int]), |_, args| {
///         Ok(HostValue::Int(args.i32(0)? + args.i32(1)?))
///     })
///     .returns(ReturnKind::Integer);
/// runtime.register_method(add)?;
/// ```
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    returns: ReturnKind,
    pub(crate) target: Target,
}

impl MethodDescriptor {
    /// A callback that sees raw script arguments and may return anything.
    pub fn callback<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CallContext) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            returns: ReturnKind::Any,
            target: Target::Raw(Arc::new(f)),
        }
    }

    /// A callback whose result script always sees as `undefined`.
    pub fn void_callback<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CallContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            returns: ReturnKind::Void,
            target: Target::Raw(Arc::new(move |ctx| f(ctx).map(|_| HostValue::Undefined))),
        }
    }

    /// An empty overload set; add signatures with [`overload`](Self::overload).
    pub fn method(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            returns: ReturnKind::Any,
            target: Target::Overloads(Vec::new()),
        }
    }

    /// Append an overload. Overloads are tried in the order they are added.
    /// Adding one to a raw callback turns it into an overload set.
    pub fn overload<F>(mut self, signature: Signature, f: F) -> Self
    where
        F: Fn(&CallContext, Args) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        let overload = Overload {
            signature,
            body: Arc::new(f),
        };
        match &mut self.target {
            Target::Overloads(list) => list.push(overload),
            Target::Raw(_) => self.target = Target::Overloads(vec![overload]),
        }
        self
    }

    pub fn returns(mut self, returns: ReturnKind) -> Self {
        self.returns = returns;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.returns
    }

    pub fn signatures(&self) -> Vec<Signature> {
        match &self.target {
            Target::Raw(_) => Vec::new(),
            Target::Overloads(list) => list.iter().map(|o| o.signature.clone()).collect(),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("signatures", &self.signatures())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Callbacks registered in one runtime, indexed by [`CallbackId`].
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    entries: Mutex<Vec<Arc<MethodDescriptor>>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, descriptor: MethodDescriptor) -> CallbackId {
        let mut entries = self.entries.lock();
        let id = CallbackId(entries.len() as u32);
        entries.push(Arc::new(descriptor));
        id
    }

    pub(crate) fn get(&self, id: CallbackId) -> Option<Arc<MethodDescriptor>> {
        self.entries.lock().get(id.0 as usize).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Empty the table, handing the entries to the caller so they are dropped
    /// outside the lock.
    pub(crate) fn take_all(&self) -> Vec<Arc<MethodDescriptor>> {
        std::mem::take(&mut *self.entries.lock())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Call context
// ─────────────────────────────────────────────────────────────────────────────

/// What a host callback sees of the script call that reached it.
///
/// Handles in the receiver and arguments are released when the callback
/// returns; [`twin`](Handle::twin) anything that must outlive the call.
pub struct CallContext {
    runtime: Runtime,
    receiver: Handle,
    args: Vec<Value>,
    name: String,
}

impl CallContext {
    pub(crate) fn new(runtime: Runtime, receiver: Handle, args: Vec<Value>, name: String) -> Self {
        Self {
            runtime,
            receiver,
            args,
            name,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// `this` of the call, the global object for plain function calls.
    pub fn receiver(&self) -> &Handle {
        &self.receiver
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn integer(&self, index: usize) -> Result<i32> {
        self.arg(index)
            .and_then(Value::as_i32)
            .ok_or_else(|| self.not_a(index, "an integer"))
    }

    pub fn double(&self, index: usize) -> Result<f64> {
        self.arg(index)
            .and_then(Value::as_f64)
            .ok_or_else(|| self.not_a(index, "a number"))
    }

    pub fn boolean(&self, index: usize) -> Result<bool> {
        self.arg(index)
            .and_then(Value::as_bool)
            .ok_or_else(|| self.not_a(index, "a boolean"))
    }

    pub fn string(&self, index: usize) -> Result<&str> {
        self.arg(index)
            .and_then(Value::as_str)
            .ok_or_else(|| self.not_a(index, "a string"))
    }

    pub fn handle(&self, index: usize) -> Result<&Handle> {
        self.arg(index)
            .and_then(Value::as_handle)
            .ok_or_else(|| self.not_a(index, "an object"))
    }

    fn not_a(&self, index: usize, what: &str) -> Error {
        Error::argument(format!("{}: argument {} is not {}", self.name, index, what))
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coerced arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Arguments after coercion against a [`Signature`], one per parameter. A
/// variadic tail arrives as a single [`HostValue::Array`].
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<HostValue>);

impl Args {
    pub(crate) fn new(values: Vec<HostValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HostValue> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostValue> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<HostValue> {
        self.0
    }

    pub fn i16(&self, index: usize) -> Result<i16> {
        match self.get(index) {
            Some(HostValue::Short(v)) => Ok(*v),
            _ => Err(not_a(index, "short")),
        }
    }

    pub fn i32(&self, index: usize) -> Result<i32> {
        match self.get(index) {
            Some(HostValue::Int(v)) => Ok(*v),
            _ => Err(not_a(index, "int")),
        }
    }

    pub fn i64(&self, index: usize) -> Result<i64> {
        match self.get(index) {
            Some(HostValue::Long(v)) => Ok(*v),
            _ => Err(not_a(index, "long")),
        }
    }

    pub fn f32(&self, index: usize) -> Result<f32> {
        match self.get(index) {
            Some(HostValue::Float(v)) => Ok(*v),
            _ => Err(not_a(index, "float")),
        }
    }

    pub fn f64(&self, index: usize) -> Result<f64> {
        match self.get(index) {
            Some(HostValue::Double(v)) => Ok(*v),
            _ => Err(not_a(index, "double")),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        match self.get(index) {
            Some(HostValue::Bool(v)) => Ok(*v),
            _ => Err(not_a(index, "boolean")),
        }
    }

    /// `None` when script passed `null` or `undefined`.
    pub fn string(&self, index: usize) -> Result<Option<&str>> {
        match self.get(index) {
            Some(HostValue::String(s)) => Ok(Some(s)),
            Some(v) if v.is_nullish() => Ok(None),
            _ => Err(not_a(index, "String")),
        }
    }

    pub fn handle(&self, index: usize) -> Result<&Handle> {
        match self.get(index) {
            Some(HostValue::Handle(h)) => Ok(h),
            _ => Err(not_a(index, "Handle")),
        }
    }

    pub fn object(&self, index: usize) -> Result<&HostObject> {
        match self.get(index) {
            Some(HostValue::Object(o)) => Ok(o),
            _ => Err(not_a(index, "host object")),
        }
    }

    pub fn function(&self, index: usize) -> Result<&ScriptFunction> {
        match self.get(index) {
            Some(HostValue::Function(f)) => Ok(f),
            _ => Err(not_a(index, "Function")),
        }
    }

    pub fn array(&self, index: usize) -> Result<&[HostValue]> {
        match self.get(index) {
            Some(HostValue::Array(items)) => Ok(items),
            _ => Err(not_a(index, "array")),
        }
    }
}

fn not_a(index: usize, what: &str) -> Error {
    Error::argument(format!("Argument {} is not {}", index, what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::ParamKind;

    #[test]
    fn test_descriptor_builders() {
        let add = MethodDescriptor::method("add")
            .overload(Signature::new([ParamKind::Int]), |_, _| Ok(HostValue::Undefined))
            .overload(Signature::new([ParamKind::Double]), |_, _| Ok(HostValue::Undefined))
            .returns(ReturnKind::Integer);
        assert_eq!(add.name(), "add");
        assert_eq!(add.return_kind(), ReturnKind::Integer);
        assert_eq!(add.signatures().len(), 2);

        let void = MethodDescriptor::void_callback("log", |_| Ok(()));
        assert_eq!(void.return_kind(), ReturnKind::Void);
        assert!(void.signatures().is_empty());
    }

    #[test]
    fn test_registry_ids_are_sequential() {
        let registry = CallbackRegistry::new();
        let a = registry.register(MethodDescriptor::callback("a", |_| Ok(HostValue::Null)));
        let b = registry.register(MethodDescriptor::callback("b", |_| Ok(HostValue::Null)));
        assert_eq!(a, CallbackId(0));
        assert_eq!(b, CallbackId(1));
        assert_eq!(registry.get(b).unwrap().name(), "b");
        assert_eq!(registry.take_all().len(), 2);
        assert!(registry.get(a).is_none());
    }

    #[test]
    fn test_args_accessors() {
        let args = Args::new(vec![HostValue::Int(1), HostValue::Null, HostValue::from(vec![1.5])]);
        assert_eq!(args.i32(0).unwrap(), 1);
        assert!(args.f64(0).is_err());
        assert_eq!(args.string(1).unwrap(), None);
        assert_eq!(args.array(2).unwrap().len(), 1);
        assert!(matches!(args.handle(5), Err(Error::Argument(_))));
    }
}
