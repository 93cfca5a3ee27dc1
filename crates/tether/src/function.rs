//! Function capability.

use tether_types::ValueKind;

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::object::sealed::Sealed;
use crate::runtime::expect_result;
use crate::value::{HostValue, Value};

/// Invocation of function handles from the host.
pub trait Callable: Sealed {
    /// Call with `receiver` as `this`, or the global object when `None`.
    fn call(&self, receiver: Option<&Handle>, args: Vec<HostValue>) -> Result<Value> {
        let target = self.target()?;
        if target.kind != ValueKind::Function {
            return Err(Error::argument(format!("Expected a function, found {}", target.kind)));
        }
        let receiver = match receiver {
            Some(handle) if !handle.is_undefined() => {
                if !handle.belongs_to(&target.runtime) {
                    return Err(Error::argument("Receiver belongs to a different runtime"));
                }
                Some(handle.native_id_or_err()?)
            }
            _ => None,
        };
        target.runtime.invoke(target.id, receiver, &args)
    }

    /// Call and check the result, see [`Runtime::execute_expecting`].
    ///
    /// [`Runtime::execute_expecting`]: crate::Runtime::execute_expecting
    fn call_as(&self, expected: ValueKind, receiver: Option<&Handle>, args: Vec<HostValue>) -> Result<Value> {
        expect_result(self.call(receiver, args)?, expected)
    }

    fn call_integer(&self, receiver: Option<&Handle>, args: Vec<HostValue>) -> Result<i32> {
        let value = self.call_as(ValueKind::Integer, receiver, args)?;
        value
            .as_i32()
            .ok_or_else(|| Error::mismatch(ValueKind::Integer, value.kind()))
    }

    fn call_double(&self, receiver: Option<&Handle>, args: Vec<HostValue>) -> Result<f64> {
        let value = self.call_as(ValueKind::Double, receiver, args)?;
        value
            .as_f64()
            .ok_or_else(|| Error::mismatch(ValueKind::Double, value.kind()))
    }

    fn call_string(&self, receiver: Option<&Handle>, args: Vec<HostValue>) -> Result<String> {
        let value = self.call_as(ValueKind::String, receiver, args)?;
        let kind = value.kind();
        value
            .into_string()
            .ok_or_else(|| Error::mismatch(ValueKind::String, kind))
    }

    fn call_void(&self, receiver: Option<&Handle>, args: Vec<HostValue>) -> Result<()> {
        self.call_as(ValueKind::Undefined, receiver, args)?;
        Ok(())
    }
}

impl Callable for Handle {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tether_engine::MemoryEngine;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::object::ObjectLike;
    use crate::runtime::Runtime;

    const READ_X: &str = "(function () { return this.x; })";

    fn runtime() -> Runtime {
        let engine = MemoryEngine::new();
        engine.define_script(READ_X, |scope| Ok(scope.new_function(|s| s.get(&s.this(), "x"))));
        Runtime::with_engine(Arc::new(engine), RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_receiver_binding() {
        let runtime = runtime();
        runtime.set("x", 1).unwrap();
        let read_x = runtime.execute_script(READ_X).unwrap().into_handle().unwrap();

        let receiver = runtime.new_object().unwrap();
        receiver.set("x", 5).unwrap();
        assert_eq!(read_x.call_integer(Some(&receiver), Vec::new()).unwrap(), 5);
        // no receiver means the global object
        assert_eq!(read_x.call_integer(None, Vec::new()).unwrap(), 1);
        assert_eq!(read_x.call_integer(Some(&Handle::undefined()), Vec::new()).unwrap(), 1);

        read_x.release().unwrap();
        receiver.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_receiver_from_another_runtime() {
        let runtime = runtime();
        let other = Runtime::create().unwrap();
        let read_x = runtime.execute_script(READ_X).unwrap().into_handle().unwrap();
        let foreign = other.new_object().unwrap();

        assert!(matches!(read_x.call(Some(&foreign), Vec::new()), Err(Error::Argument(_))));

        foreign.release().unwrap();
        other.release().unwrap();
        read_x.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_call_void_discards_result() {
        let runtime = runtime();
        let read_x = runtime.execute_script(READ_X).unwrap().into_handle().unwrap();
        let receiver = runtime.new_object().unwrap();
        let holder = runtime.new_object().unwrap();
        receiver.set("x", &holder).unwrap();

        read_x.call_void(Some(&receiver), Vec::new()).unwrap();
        assert_eq!(runtime.object_reference_count(), 3);

        for handle in [read_x, receiver, holder] {
            handle.release().unwrap();
        }
        runtime.release().unwrap();
    }
}
