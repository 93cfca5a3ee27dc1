//! Script → host argument coercion and first-fit overload selection.

use std::cell::RefCell;
use std::sync::Arc;

use tether_types::ValueKind;

use super::registry::Overload;
use super::{Args, CallContext, HandleScope, ParamKind, ScriptFunction, Signature};
use crate::bridge::Resolved;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::runtime::RuntimeInner;
use crate::value::{HostValue, Value};

pub(crate) const AGED_OUT: &str =
    "Argument has invalid host object handle or object referenced by handle has aged out.";
pub(crate) const NOT_HOST: &str = "Complex objects can only be passed to the host if they represent host objects.";
const WRONG_HOST_TYPE: &str = "Argument is a host object but does not match the signature for this method.";

/// Why one argument did not bind.
#[derive(Debug)]
pub(crate) enum Rejection {
    /// The value's kind does not fit; try the next overload.
    Mismatch,
    /// The value fits nothing for a reason worth reporting on its own.
    Argument(String),
    /// The engine or runtime failed; stop trying.
    Fatal(Error),
}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        Rejection::Fatal(err)
    }
}

pub(crate) struct Coercer<'a> {
    runtime: &'a Arc<RuntimeInner>,
    /// Bound to any script function that coerces to [`ParamKind::Function`].
    receiver: &'a Handle,
    /// Array elements read while coercing. They live until the call returns.
    temps: RefCell<HandleScope>,
}

impl<'a> Coercer<'a> {
    pub(crate) fn new(runtime: &'a Arc<RuntimeInner>, receiver: &'a Handle) -> Self {
        Self {
            runtime,
            receiver,
            temps: RefCell::new(HandleScope::new()),
        }
    }

    pub(crate) fn into_scope(self) -> HandleScope {
        self.temps.into_inner()
    }

    /// Coerce a full argument list against `signature`.
    pub(crate) fn coerce_args(&self, signature: &Signature, values: &[Value]) -> std::result::Result<Args, Rejection> {
        if !signature.accepts_arity(values.len()) {
            return Err(Rejection::Mismatch);
        }
        let params = signature.params();
        if !signature.is_varargs() {
            let coerced = params
                .iter()
                .zip(values)
                .map(|(param, value)| self.coerce(param, value))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(Args::new(coerced));
        }

        let fixed = params.len() - 1;
        let element = &params[fixed];
        let mut coerced = Vec::with_capacity(params.len());
        for (param, value) in params[..fixed].iter().zip(values) {
            coerced.push(self.coerce(param, value)?);
        }
        let rest = values[fixed..]
            .iter()
            .map(|value| self.coerce(element, value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        coerced.push(HostValue::Array(rest));
        Ok(Args::new(coerced))
    }

    pub(crate) fn coerce(&self, param: &ParamKind, value: &Value) -> std::result::Result<HostValue, Rejection> {
        match (param, value) {
            (ParamKind::Any, Value::Handle(handle)) if handle.kind() == ValueKind::Object => {
                match self.runtime.bridge.resolve(self.runtime, handle)? {
                    Resolved::Host(object) => Ok(HostValue::Object(object)),
                    Resolved::NotHost => Ok(HostValue::Handle(handle.clone())),
                    Resolved::AgedOut => Err(Rejection::Argument(AGED_OUT.to_string())),
                }
            }
            (ParamKind::Any, other) => Ok(other.clone().into()),

            // integers never narrow to short
            (ParamKind::Int, Value::Integer(i)) => Ok(HostValue::Int(*i)),
            (ParamKind::Long, Value::Integer(i)) => Ok(HostValue::Long(*i as i64)),
            (ParamKind::Float, Value::Integer(i)) => Ok(HostValue::Float(*i as f32)),
            (ParamKind::Double, Value::Integer(i)) => Ok(HostValue::Double(*i as f64)),
            (ParamKind::Double, Value::Double(d)) => Ok(HostValue::Double(*d)),
            (ParamKind::Bool, Value::Boolean(b)) => Ok(HostValue::Bool(*b)),

            (ParamKind::String, Value::String(s)) => Ok(HostValue::String(s.clone())),
            (ParamKind::String | ParamKind::Handle | ParamKind::Host(_) | ParamKind::Function, Value::Null) => {
                Ok(HostValue::Null)
            }
            (ParamKind::String | ParamKind::Handle | ParamKind::Host(_) | ParamKind::Function, Value::Undefined) => {
                Ok(HostValue::Undefined)
            }

            (ParamKind::Handle, Value::Handle(handle)) => Ok(HostValue::Handle(handle.clone())),

            (ParamKind::Host(expected), Value::Handle(handle)) => {
                if handle.kind() != ValueKind::Object {
                    return Err(Rejection::Mismatch);
                }
                match self.runtime.bridge.resolve(self.runtime, handle)? {
                    Resolved::Host(object) if object.value_type() == expected.id() => {
                        self.runtime.bridge.read_injected(self.runtime, handle, &object)?;
                        Ok(HostValue::Object(object))
                    }
                    Resolved::Host(_) => Err(Rejection::Argument(WRONG_HOST_TYPE.to_string())),
                    Resolved::NotHost => Err(Rejection::Argument(NOT_HOST.to_string())),
                    Resolved::AgedOut => Err(Rejection::Argument(AGED_OUT.to_string())),
                }
            }

            (ParamKind::Array(element), Value::Handle(handle)) if handle.kind() == ValueKind::Array => {
                self.coerce_array(element, handle)
            }

            (ParamKind::Function, Value::Handle(handle)) if handle.kind() == ValueKind::Function => {
                Ok(HostValue::Function(ScriptFunction::bind(self.receiver, handle)?))
            }

            _ => Err(Rejection::Mismatch),
        }
    }

    /// Elements are read into the coercer's scope, so they are released
    /// with it whether or not the overload binds.
    fn coerce_array(&self, element: &ParamKind, array: &Handle) -> std::result::Result<HostValue, Rejection> {
        let runtime = self.runtime;
        let id = array.native_id_or_err()?;
        let length = runtime.engine.array_length(runtime.isolate, id).map_err(Error::from)?;
        let mut items = Vec::with_capacity(length);
        for index in 0..length {
            let raw = runtime
                .engine
                .get_element(runtime.isolate, id, index)
                .map_err(Error::from)?;
            let value = self.temps.borrow_mut().adopt(runtime.wrap(raw));
            items.push(self.coerce(element, &value)?);
        }
        Ok(HostValue::Array(items))
    }
}

/// Pick the first overload whose signature accepts `ctx`'s arguments. The
/// returned scope holds values read during coercion; drop it after the call.
///
/// Overloads are tried in registration order, not by specificity. When none
/// fits, a specific argument failure (such as an aged-out host object) is
/// reported in preference to the generic no-signature error.
pub(crate) fn first_fit<'o>(
    runtime: &Arc<RuntimeInner>,
    ctx: &CallContext,
    overloads: &'o [Overload],
) -> Result<(&'o Overload, Args, HandleScope)> {
    let coercer = Coercer::new(runtime, ctx.receiver());
    let mut specific = None;
    for overload in overloads {
        match coercer.coerce_args(&overload.signature, ctx.args()) {
            Ok(args) => return Ok((overload, args, coercer.into_scope())),
            Err(Rejection::Mismatch) => {}
            Err(Rejection::Argument(message)) => {
                specific.get_or_insert(message);
            }
            Err(Rejection::Fatal(err)) => return Err(err),
        }
    }
    if let Some(message) = specific {
        return Err(Error::Argument(message));
    }
    Err(Error::NoMatchingSignature {
        name: ctx.name().to_string(),
        arguments: describe(ctx.args()),
    })
}

/// `integer, string, object` style listing of argument kinds.
pub(crate) fn describe(args: &[Value]) -> String {
    args.iter()
        .map(|a| a.kind().name())
        .collect::<Vec<_>>()
        .join(", ")
}
