//! Conversion between script values and `serde_json` values.

use serde_json::{Map, Number, Value as Json};
use tether_types::ValueKind;

use crate::array::ArrayLike;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::object::ObjectLike;
use crate::runtime::Runtime;
use crate::value::{HostValue, Value};

/// Deep copy of a script value. Functions and `undefined` become `null`;
/// non-finite numbers too. Cycles are an argument error.
pub fn to_json(value: &Value) -> Result<Json> {
    let mut ancestors = Vec::new();
    value_to_json(value, &mut ancestors)
}

/// Deep copy of a script object's own properties.
pub fn to_json_object(object: &Handle) -> Result<Map<String, Json>> {
    let mut ancestors = Vec::new();
    match handle_to_json(object, &mut ancestors)? {
        Json::Object(map) => Ok(map),
        _ => Err(Error::mismatch(ValueKind::Object, object.kind())),
    }
}

pub fn to_json_array(array: &Handle) -> Result<Vec<Json>> {
    if array.kind() != ValueKind::Array {
        return Err(Error::mismatch(ValueKind::Array, array.kind()));
    }
    let mut ancestors = Vec::new();
    match handle_to_json(array, &mut ancestors)? {
        Json::Array(items) => Ok(items),
        _ => Err(Error::mismatch(ValueKind::Array, array.kind())),
    }
}

fn value_to_json(value: &Value, ancestors: &mut Vec<Handle>) -> Result<Json> {
    Ok(match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Double(d) => Number::from_f64(*d).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Handle(handle) => handle_to_json(handle, ancestors)?,
    })
}

fn handle_to_json(handle: &Handle, ancestors: &mut Vec<Handle>) -> Result<Json> {
    match handle.kind() {
        ValueKind::Object | ValueKind::Array => {}
        _ => return Ok(Json::Null),
    }
    for ancestor in ancestors.iter() {
        if ancestor.strict_equals(handle)? {
            return Err(Error::argument("Cannot convert a cyclic structure to JSON"));
        }
    }

    ancestors.push(handle.clone());
    let result = if handle.kind() == ValueKind::Array {
        array_to_json(handle, ancestors)
    } else {
        object_to_json(handle, ancestors)
    };
    ancestors.pop();
    result
}

fn array_to_json(array: &Handle, ancestors: &mut Vec<Handle>) -> Result<Json> {
    let length = array.length()?;
    let mut items = Vec::with_capacity(length);
    for index in 0..length {
        let element = array.get_at(index)?;
        let converted = value_to_json(&element, ancestors);
        element.release()?;
        items.push(converted?);
    }
    Ok(Json::Array(items))
}

fn object_to_json(object: &Handle, ancestors: &mut Vec<Handle>) -> Result<Json> {
    let mut map = Map::new();
    for key in object.keys()? {
        let property = object.get(&key)?;
        let converted = value_to_json(&property, ancestors);
        property.release()?;
        map.insert(key, converted?);
    }
    Ok(Json::Object(map))
}

/// Build script values from JSON. Objects and arrays come back as counted
/// handles owned by the caller.
pub fn from_json(runtime: &Runtime, json: &Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => number(n),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => {
            let array = runtime.new_array()?;
            for item in items {
                let element = from_json(runtime, item)?;
                let pushed = array.push(HostValue::from(element.clone()));
                element.release()?;
                pushed?;
            }
            Value::Handle(array)
        }
        Json::Object(map) => {
            let object = runtime.new_object()?;
            for (key, item) in map {
                let property = from_json(runtime, item)?;
                let set = object.set(key, HostValue::from(property.clone()));
                property.release()?;
                set?;
            }
            Value::Handle(object)
        }
    })
}

fn number(n: &Number) -> Value {
    if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
        return Value::Integer(i);
    }
    let d = n.as_f64().unwrap_or(f64::NAN);
    if d.fract() == 0.0 && d >= i32::MIN as f64 && d <= i32::MAX as f64 && !(d == 0.0 && d.is_sign_negative()) {
        Value::Integer(d as i32)
    } else {
        Value::Double(d)
    }
}
