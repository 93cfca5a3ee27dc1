//! Object capability, shared by handles and the runtime's global object.

use std::sync::Arc;

use tether_engine::{EngineValue, NativeId, ScriptOrigin};
use tether_types::{ReturnKind, ScriptException, ValueKind};

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::marshal::{CallContext, HandleScope, MethodDescriptor, to_engine};
use crate::runtime::{RuntimeInner, expect_result};
use crate::value::{HostValue, Value};

pub(crate) mod sealed {
    use super::*;

    /// Where an operation lands: a checked runtime and a live native id.
    pub struct Target {
        pub(crate) runtime: Arc<RuntimeInner>,
        pub(crate) id: NativeId,
        pub(crate) kind: ValueKind,
    }

    pub trait Sealed {
        /// Fails when the receiver or its runtime is released, or the caller
        /// does not hold the runtime's lock.
        fn target(&self) -> Result<Target>;
    }
}

use sealed::{Sealed, Target};

impl Target {
    pub(crate) fn get_raw(&self, key: &str) -> Result<Value> {
        let value = self.runtime.engine.get_property(self.runtime.isolate, self.id, key)?;
        Ok(self.runtime.wrap(value))
    }

    pub(crate) fn set_raw(&self, key: &str, value: &HostValue) -> Result<()> {
        let mut temps = HandleScope::new();
        let converted = to_engine(&self.runtime, value, &mut temps)?;
        self.runtime
            .engine
            .set_property(self.runtime.isolate, self.id, key, &converted)?;
        Ok(())
    }

    pub(crate) fn set_engine(&self, key: &str, value: &EngineValue) -> Result<()> {
        self.runtime
            .engine
            .set_property(self.runtime.isolate, self.id, key, value)?;
        Ok(())
    }
}

/// Operations on anything with properties: objects, arrays, functions and
/// the global object (through [`Runtime`](crate::Runtime)).
pub trait ObjectLike: Sealed {
    fn get(&self, key: &str) -> Result<Value> {
        self.target()?.get_raw(key)
    }

    fn get_integer(&self, key: &str) -> Result<i32> {
        let value = expect_result(self.get(key)?, ValueKind::Integer)?;
        value
            .as_i32()
            .ok_or_else(|| Error::mismatch(ValueKind::Integer, value.kind()))
    }

    fn get_double(&self, key: &str) -> Result<f64> {
        let value = expect_result(self.get(key)?, ValueKind::Double)?;
        value
            .as_f64()
            .ok_or_else(|| Error::mismatch(ValueKind::Double, value.kind()))
    }

    fn get_boolean(&self, key: &str) -> Result<bool> {
        let value = expect_result(self.get(key)?, ValueKind::Boolean)?;
        value
            .as_bool()
            .ok_or_else(|| Error::mismatch(ValueKind::Boolean, value.kind()))
    }

    fn get_string(&self, key: &str) -> Result<String> {
        let value = expect_result(self.get(key)?, ValueKind::String)?;
        let kind = value.kind();
        value
            .into_string()
            .ok_or_else(|| Error::mismatch(ValueKind::String, kind))
    }

    /// Objects, arrays and functions all qualify.
    fn get_object(&self, key: &str) -> Result<Handle> {
        let value = expect_result(self.get(key)?, ValueKind::Object)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Object, kind))
    }

    fn get_array(&self, key: &str) -> Result<Handle> {
        let value = expect_result(self.get(key)?, ValueKind::Array)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Array, kind))
    }

    fn set(&self, key: &str, value: impl Into<HostValue>) -> Result<()>
    where
        Self: Sized,
    {
        self.target()?.set_raw(key, &value.into())
    }

    fn set_undefined(&self, key: &str) -> Result<()> {
        self.target()?.set_engine(key, &EngineValue::Undefined)
    }

    fn set_null(&self, key: &str) -> Result<()> {
        self.target()?.set_engine(key, &EngineValue::Null)
    }

    /// Own enumerable key test.
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.keys()?.iter().any(|k| k == key))
    }

    fn keys(&self) -> Result<Vec<String>> {
        let target = self.target()?;
        Ok(target.runtime.engine.property_keys(target.runtime.isolate, target.id)?)
    }

    /// Kind of the value under `key`, without keeping a handle to it.
    fn type_of(&self, key: &str) -> Result<ValueKind> {
        let value = self.get(key)?;
        let kind = value.kind();
        value.release()?;
        Ok(kind)
    }

    fn set_prototype(&self, prototype: &Handle) -> Result<()> {
        let target = self.target()?;
        let (_, proto) = prototype.resolve()?;
        target
            .runtime
            .engine
            .set_prototype(target.runtime.isolate, target.id, proto)?;
        Ok(())
    }

    /// Call the method `name` with this object as receiver.
    fn execute_function(&self, name: &str, args: Vec<HostValue>) -> Result<Value> {
        let target = self.target()?;
        let function = target.get_raw(name)?;
        let function = match function {
            Value::Handle(handle) if handle.kind() == ValueKind::Function => handle,
            other => {
                other.release()?;
                let origin = ScriptOrigin::default();
                return Err(ScriptException::execution(
                    &origin.name,
                    0,
                    format!("TypeError: {} is not a function", name),
                )
                .into());
            }
        };
        let result = target.runtime.invoke(function.native_id_or_err()?, Some(target.id), &args);
        function.release()?;
        result
    }

    fn execute_integer_function(&self, name: &str, args: Vec<HostValue>) -> Result<i32> {
        let value = expect_result(self.execute_function(name, args)?, ValueKind::Integer)?;
        value
            .as_i32()
            .ok_or_else(|| Error::mismatch(ValueKind::Integer, value.kind()))
    }

    fn execute_double_function(&self, name: &str, args: Vec<HostValue>) -> Result<f64> {
        let value = expect_result(self.execute_function(name, args)?, ValueKind::Double)?;
        value
            .as_f64()
            .ok_or_else(|| Error::mismatch(ValueKind::Double, value.kind()))
    }

    fn execute_boolean_function(&self, name: &str, args: Vec<HostValue>) -> Result<bool> {
        let value = expect_result(self.execute_function(name, args)?, ValueKind::Boolean)?;
        value
            .as_bool()
            .ok_or_else(|| Error::mismatch(ValueKind::Boolean, value.kind()))
    }

    fn execute_string_function(&self, name: &str, args: Vec<HostValue>) -> Result<String> {
        let value = expect_result(self.execute_function(name, args)?, ValueKind::String)?;
        let kind = value.kind();
        value
            .into_string()
            .ok_or_else(|| Error::mismatch(ValueKind::String, kind))
    }

    fn execute_object_function(&self, name: &str, args: Vec<HostValue>) -> Result<Handle> {
        let value = expect_result(self.execute_function(name, args)?, ValueKind::Object)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Object, kind))
    }

    fn execute_array_function(&self, name: &str, args: Vec<HostValue>) -> Result<Handle> {
        let value = expect_result(self.execute_function(name, args)?, ValueKind::Array)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Array, kind))
    }

    fn execute_void_function(&self, name: &str, args: Vec<HostValue>) -> Result<()> {
        expect_result(self.execute_function(name, args)?, ValueKind::Undefined)?;
        Ok(())
    }

    /// Install `name` as a host callback seeing raw script arguments.
    fn register_callback<F>(&self, name: &str, f: F) -> Result<()>
    where
        Self: Sized,
        F: Fn(&CallContext) -> anyhow::Result<HostValue> + Send + Sync + 'static,
    {
        self.register_method(MethodDescriptor::callback(name, f))
    }

    fn register_void_callback<F>(&self, name: &str, f: F) -> Result<()>
    where
        Self: Sized,
        F: Fn(&CallContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_method(MethodDescriptor::void_callback(name, f))
    }

    /// Install a descriptor under its own name.
    fn register_method(&self, descriptor: MethodDescriptor) -> Result<()> {
        let target = self.target()?;
        let name = descriptor.name().to_string();
        let returns: ReturnKind = descriptor.return_kind();
        let callback = target.runtime.callbacks.register(descriptor);
        target
            .runtime
            .engine
            .register_host_callback(target.runtime.isolate, target.id, &name, callback, returns)?;
        tracing::trace!("[runtime:{}] registered {} as {}", target.runtime.name(), name, callback);
        Ok(())
    }
}

impl ObjectLike for Handle {}
impl ObjectLike for crate::runtime::Runtime {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    #[test]
    fn test_get_and_set_primitives() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        object.set("i", 7).unwrap();
        object.set("d", 2.5).unwrap();
        object.set("b", true).unwrap();
        object.set("s", "text").unwrap();
        object.set_null("n").unwrap();
        object.set_undefined("u").unwrap();

        assert_eq!(object.get_integer("i").unwrap(), 7);
        assert_eq!(object.get_double("d").unwrap(), 2.5);
        assert_eq!(object.get_double("i").unwrap(), 7.0);
        assert!(object.get_boolean("b").unwrap());
        assert_eq!(object.get_string("s").unwrap(), "text");
        assert_eq!(object.type_of("n").unwrap(), ValueKind::Null);
        assert_eq!(object.keys().unwrap(), vec!["i", "d", "b", "s", "n", "u"]);
        assert!(object.contains("s").unwrap());
        assert!(!object.contains("missing").unwrap());

        object.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_typed_get_errors_are_distinct() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        object.set("s", "text").unwrap();

        assert!(matches!(object.get_integer("s").unwrap_err(), Error::ResultTypeMismatch { .. }));
        assert!(matches!(object.get_integer("missing").unwrap_err(), Error::UndefinedResult { .. }));

        object.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_nested_objects_are_counted() {
        let runtime = Runtime::create().unwrap();
        let parent = runtime.new_object().unwrap();
        let child = runtime.new_object().unwrap();
        child.set("x", 1).unwrap();
        parent.set("child", &child).unwrap();
        child.release().unwrap();

        let again = parent.get_object("child").unwrap();
        assert_eq!(runtime.object_reference_count(), 2);
        assert_eq!(again.get_integer("x").unwrap(), 1);
        again.release().unwrap();
        parent.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_out_of_range_array_keys() {
        use crate::array::ArrayLike;

        let runtime = Runtime::create().unwrap();
        let array = runtime.new_array_from(vec![1]).unwrap();
        array.set("18446744073709551615", 2).unwrap();
        array.set("4294967295", 3).unwrap();
        array.set("4000000000", 4).unwrap();

        assert_eq!(array.length().unwrap(), 1);
        assert_eq!(array.get_integer("18446744073709551615").unwrap(), 2);
        assert_eq!(array.get_integer("4294967295").unwrap(), 3);
        assert_eq!(array.get_integer("4000000000").unwrap(), 4);
        assert_eq!(array.integer_at(0).unwrap(), 1);

        array.set("3", 5).unwrap();
        assert_eq!(array.length().unwrap(), 4);
        assert_eq!(array.integer_at(3).unwrap(), 5);

        array.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_global_object_through_runtime() {
        let runtime = Runtime::create().unwrap();
        runtime.set("answer", 42).unwrap();
        assert_eq!(runtime.execute_integer_script("answer").unwrap(), 42);
        assert_eq!(runtime.get_integer("answer").unwrap(), 42);
        runtime.release().unwrap();
    }

    #[test]
    fn test_prototype_lookup() {
        let runtime = Runtime::create().unwrap();
        let proto = runtime.new_object().unwrap();
        proto.set("shared", "yes").unwrap();
        let object = runtime.new_object().unwrap();
        object.set_prototype(&proto).unwrap();

        assert_eq!(object.get_string("shared").unwrap(), "yes");
        assert!(!object.contains("shared").unwrap());

        proto.release().unwrap();
        object.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_execute_missing_function() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        let err = object.execute_function("nope", vec![]).unwrap_err();
        let Error::Script(exception) = err else {
            panic!("expected a script exception, got {err:?}");
        };
        assert!(exception.message.contains("nope is not a function"));
        object.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_register_callback_and_call_from_host() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        object
            .register_callback("twice", |ctx| Ok(HostValue::Int(ctx.integer(0)? * 2)))
            .unwrap();

        assert_eq!(object.execute_integer_function("twice", vec![21.into()]).unwrap(), 42);
        assert_eq!(object.type_of("twice").unwrap(), ValueKind::Function);
        assert_eq!(runtime.object_reference_count(), 1);

        object.release().unwrap();
        runtime.release().unwrap();
    }
}
