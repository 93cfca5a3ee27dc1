use std::fmt;

use crate::bridge::Resolved;
use crate::error::Result;
use crate::function::Callable;
use crate::handle::Handle;
use crate::value::{HostValue, Value};

/// A script function captured by the host, bound to the receiver it arrived
/// with. Holds its own twins of both, so it stays valid after the callback
/// that received it returns. Release it when done.
#[derive(Clone)]
pub struct ScriptFunction {
    receiver: Handle,
    function: Handle,
}

impl ScriptFunction {
    pub(crate) fn bind(receiver: &Handle, function: &Handle) -> Result<Self> {
        let function = function.twin()?;
        let receiver = match receiver.twin() {
            Ok(r) => r,
            Err(e) => {
                let _ = function.release();
                return Err(e);
            }
        };
        Ok(Self { receiver, function })
    }

    pub fn function(&self) -> &Handle {
        &self.function
    }

    pub fn receiver(&self) -> &Handle {
        &self.receiver
    }

    /// Call into script with the bound receiver.
    pub fn call(&self, args: Vec<HostValue>) -> Result<Value> {
        let receiver = if self.receiver.is_undefined() { None } else { Some(&self.receiver) };
        self.function.call(receiver, args)
    }

    /// Like [`call`](Self::call), but a returned bridge proxy comes back as
    /// the host object it stands for.
    pub fn call_host(&self, args: Vec<HostValue>) -> Result<HostValue> {
        let value = self.call(args)?;
        let Value::Handle(handle) = &value else {
            return Ok(value.into());
        };
        let Some(runtime) = handle.runtime_inner() else {
            return Ok(value.into());
        };
        match runtime.bridge.resolve(&runtime, handle)? {
            Resolved::Host(object) => {
                handle.release()?;
                Ok(HostValue::Object(object))
            }
            _ => Ok(value.into()),
        }
    }

    /// Wrap as a plain closure, for host APIs that take one.
    pub fn into_fn(self) -> impl Fn(Vec<HostValue>) -> Result<Value> + Send + Sync {
        move |args| self.call(args)
    }

    pub fn release(&self) -> Result<()> {
        self.function.release()?;
        self.receiver.release()
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("function", &self.function)
            .finish()
    }
}
