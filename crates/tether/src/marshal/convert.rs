//! Host → engine value translation.

use tether_engine::EngineValue;
use tether_types::ValueKind;

use super::HandleScope;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::runtime::RuntimeInner;
use crate::value::HostValue;

/// Translate `value` for a call into the engine. References in the result are
/// borrowed; any temporary created on the way (arrays, bridge proxies) is
/// added to `temps` and must outlive the engine call.
pub(crate) fn to_engine(runtime: &RuntimeInner, value: &HostValue, temps: &mut HandleScope) -> Result<EngineValue> {
    let converted = match value {
        HostValue::Undefined => EngineValue::Undefined,
        HostValue::Null => EngineValue::Null,
        HostValue::Bool(b) => EngineValue::Boolean(*b),
        HostValue::Short(v) => EngineValue::Integer(*v as i32),
        HostValue::Int(v) => EngineValue::Integer(*v),
        HostValue::Long(v) => match i32::try_from(*v) {
            Ok(i) => EngineValue::Integer(i),
            Err(_) => EngineValue::Double(*v as f64),
        },
        HostValue::Float(v) => number(*v as f64),
        HostValue::Double(v) => number(*v),
        HostValue::String(s) => EngineValue::String(s.clone()),
        HostValue::Handle(handle) => borrow_handle(runtime, handle)?,
        HostValue::Function(function) => borrow_handle(runtime, function.function())?,
        HostValue::Array(items) => {
            let array = temps.add(runtime.new_array()?);
            let id = array.native_id_or_err()?;
            for item in items {
                let element = to_engine(runtime, item, temps)?;
                runtime.engine.push_element(runtime.isolate, id, &element)?;
            }
            EngineValue::Ref {
                id,
                kind: ValueKind::Array,
            }
        }
        HostValue::Object(object) => {
            let proxy = temps.add(runtime.bridge.proxy_for(runtime, object)?);
            EngineValue::Ref {
                id: proxy.native_id_or_err()?,
                kind: ValueKind::Object,
            }
        }
    };
    Ok(converted)
}

/// Script numbers have one representation: integral values in range are integers.
fn number(value: f64) -> EngineValue {
    let integral = value.fract() == 0.0
        && value >= i32::MIN as f64
        && value <= i32::MAX as f64
        && !(value == 0.0 && value.is_sign_negative());
    if integral {
        EngineValue::Integer(value as i32)
    } else {
        EngineValue::Double(value)
    }
}

fn borrow_handle(runtime: &RuntimeInner, handle: &Handle) -> Result<EngineValue> {
    if handle.is_undefined() {
        return Ok(EngineValue::Undefined);
    }
    if !handle.belongs_to(runtime) {
        return Err(Error::argument("Handle belongs to a different runtime"));
    }
    Ok(EngineValue::Ref {
        id: handle.native_id_or_err()?,
        kind: handle.kind(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn test_number_normalisation() {
        assert_eq!(number(3.0), EngineValue::Integer(3));
        assert_eq!(number(3.5), EngineValue::Double(3.5));
        assert!(matches!(number(-0.0), EngineValue::Double(_)));
        assert!(matches!(number(1e12), EngineValue::Double(_)));
        assert!(matches!(number(f64::NAN), EngineValue::Double(_)));
    }

    #[test]
    fn test_array_temporaries_are_scoped() {
        let runtime = Runtime::create().unwrap();
        let inner = runtime.inner();
        {
            let mut temps = HandleScope::new();
            let value = HostValue::from(vec![1, 2, 3]);
            let converted = to_engine(inner, &value, &mut temps).unwrap();
            assert_eq!(converted.kind(), ValueKind::Array);
            assert_eq!(runtime.object_reference_count(), 1);
        }
        assert_eq!(runtime.object_reference_count(), 0);
        runtime.release().unwrap();
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let a = Runtime::create().unwrap();
        let b = Runtime::create().unwrap();
        let object = b.new_object().unwrap();

        let mut temps = HandleScope::new();
        let err = to_engine(a.inner(), &HostValue::from(&object), &mut temps).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));

        object.release().unwrap();
        a.release().unwrap();
        b.release().unwrap();
    }
}
