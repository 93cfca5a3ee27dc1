//! Array capability.

use std::ops::Range;

use tether_types::ValueKind;

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::marshal::{HandleScope, to_engine};
use crate::object::sealed::{Sealed, Target};
use crate::runtime::expect_result;
use crate::value::{HostValue, Value};

fn array_target<T: Sealed + ?Sized>(this: &T) -> Result<Target> {
    let target = this.target()?;
    if target.kind != ValueKind::Array {
        return Err(Error::argument(format!("Expected an array, found {}", target.kind)));
    }
    Ok(target)
}

/// Indexed access on array handles.
pub trait ArrayLike: Sealed {
    fn length(&self) -> Result<usize> {
        let target = array_target(self)?;
        Ok(target.runtime.engine.array_length(target.runtime.isolate, target.id)?)
    }

    /// Element at `index`; out of range reads as undefined.
    fn get_at(&self, index: usize) -> Result<Value> {
        let target = array_target(self)?;
        let value = target
            .runtime
            .engine
            .get_element(target.runtime.isolate, target.id, index)?;
        Ok(target.runtime.wrap(value))
    }

    fn integer_at(&self, index: usize) -> Result<i32> {
        let value = expect_result(self.get_at(index)?, ValueKind::Integer)?;
        value
            .as_i32()
            .ok_or_else(|| Error::mismatch(ValueKind::Integer, value.kind()))
    }

    fn double_at(&self, index: usize) -> Result<f64> {
        let value = expect_result(self.get_at(index)?, ValueKind::Double)?;
        value
            .as_f64()
            .ok_or_else(|| Error::mismatch(ValueKind::Double, value.kind()))
    }

    fn boolean_at(&self, index: usize) -> Result<bool> {
        let value = expect_result(self.get_at(index)?, ValueKind::Boolean)?;
        value
            .as_bool()
            .ok_or_else(|| Error::mismatch(ValueKind::Boolean, value.kind()))
    }

    fn string_at(&self, index: usize) -> Result<String> {
        let value = expect_result(self.get_at(index)?, ValueKind::String)?;
        let kind = value.kind();
        value
            .into_string()
            .ok_or_else(|| Error::mismatch(ValueKind::String, kind))
    }

    fn object_at(&self, index: usize) -> Result<Handle> {
        let value = expect_result(self.get_at(index)?, ValueKind::Object)?;
        let kind = value.kind();
        value
            .into_handle()
            .ok_or_else(|| Error::mismatch(ValueKind::Object, kind))
    }

    fn push(&self, value: impl Into<HostValue>) -> Result<()>
    where
        Self: Sized,
    {
        let target = array_target(self)?;
        let mut temps = HandleScope::new();
        let converted = to_engine(&target.runtime, &value.into(), &mut temps)?;
        target
            .runtime
            .engine
            .push_element(target.runtime.isolate, target.id, &converted)?;
        Ok(())
    }

    fn push_undefined(&self) -> Result<()>
    where
        Self: Sized,
    {
        self.push(HostValue::Undefined)
    }

    fn type_at(&self, index: usize) -> Result<ValueKind> {
        let value = self.get_at(index)?;
        let kind = value.kind();
        value.release()?;
        Ok(kind)
    }

    /// The kind shared by every element: `Undefined` when empty,
    /// `Unsupported` when mixed.
    fn element_kind(&self) -> Result<ValueKind> {
        let mut common = None;
        for index in 0..self.length()? {
            let kind = self.type_at(index)?;
            match common {
                None => common = Some(kind),
                Some(seen) if seen == kind => {}
                Some(_) => return Ok(ValueKind::Unsupported),
            }
        }
        Ok(common.unwrap_or(ValueKind::Undefined))
    }

    /// Bulk read; every element in `range` must be an integer.
    fn integers(&self, range: Range<usize>) -> Result<Vec<i32>> {
        self.check_range(&range)?;
        range.map(|i| self.integer_at(i)).collect()
    }

    /// Bulk read; every element in `range` must be a number.
    fn doubles(&self, range: Range<usize>) -> Result<Vec<f64>> {
        self.check_range(&range)?;
        range.map(|i| self.double_at(i)).collect()
    }

    #[doc(hidden)]
    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        let length = self.length()?;
        if range.start > range.end || range.end > length {
            return Err(Error::argument(format!(
                "Range {}..{} out of bounds for length {}",
                range.start, range.end, length
            )));
        }
        Ok(())
    }
}

impl ArrayLike for Handle {}
