//! Values crossing the host/engine boundary.
//!
//! [`Value`] is what the engine hands back: a primitive or a counted
//! [`Handle`]. [`HostValue`] is what the host passes in, which additionally
//! covers the host-side numeric widths, collections, bridged objects and
//! captured script functions.

use tether_types::ValueKind;

use crate::bridge::HostObject;
use crate::error::Result;
use crate::handle::Handle;
use crate::marshal::ScriptFunction;

/// A value read from a runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    Double(f64),
    String(String),
    Handle(Handle),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::Handle(h) => h.kind(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.kind().is_absent()
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to doubles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Release the handle, if this value holds one.
    pub fn release(&self) -> Result<()> {
        match self {
            Value::Handle(h) => h.release(),
            _ => Ok(()),
        }
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        if handle.is_undefined() {
            Value::Undefined
        } else {
            Value::Handle(handle)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host values
// ─────────────────────────────────────────────────────────────────────────────

/// A value supplied by the host: an argument, a property, or a callback result.
#[derive(Debug, Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// An existing script value. Borrowed, not consumed.
    Handle(Handle),
    /// Becomes a fresh script array.
    Array(Vec<HostValue>),
    /// Becomes the object's bridge proxy.
    Object(HostObject),
    /// A script function captured earlier.
    Function(ScriptFunction),
}

impl HostValue {
    /// Wrap any host instance for bridging.
    pub fn object<T: Send + Sync + 'static>(value: T) -> Self {
        HostValue::Object(HostObject::new(value))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            HostValue::Short(v) => Some(*v as i32),
            HostValue::Int(v) => Some(*v),
            HostValue::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Short(v) => Some(*v as f64),
            HostValue::Int(v) => Some(*v as f64),
            HostValue::Long(v) => Some(*v as f64),
            HostValue::Float(v) => Some(*v as f64),
            HostValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Undefined
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<i16> for HostValue {
    fn from(v: i16) -> Self {
        HostValue::Short(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::Int(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::Long(v)
    }
}

impl From<f32> for HostValue {
    fn from(v: f32) -> Self {
        HostValue::Float(v)
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Double(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl From<Handle> for HostValue {
    fn from(v: Handle) -> Self {
        HostValue::Handle(v)
    }
}

impl From<&Handle> for HostValue {
    fn from(v: &Handle) -> Self {
        HostValue::Handle(v.clone())
    }
}

impl From<HostObject> for HostValue {
    fn from(v: HostObject) -> Self {
        HostValue::Object(v)
    }
}

impl From<ScriptFunction> for HostValue {
    fn from(v: ScriptFunction) -> Self {
        HostValue::Function(v)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::Array(items.into_iter().map(Into::into).collect())
    }
}

/// `None` becomes script `null`.
impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostValue::Null)
    }
}

impl From<Value> for HostValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Undefined => HostValue::Undefined,
            Value::Null => HostValue::Null,
            Value::Boolean(b) => HostValue::Bool(b),
            Value::Integer(i) => HostValue::Int(i),
            Value::Double(d) => HostValue::Double(d),
            Value::String(s) => HostValue::String(s),
            Value::Handle(h) => HostValue::Handle(h),
        }
    }
}
