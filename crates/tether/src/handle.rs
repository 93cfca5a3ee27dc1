//! Counted references to engine values.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tether_engine::NativeId;
use tether_types::ValueKind;

use crate::error::{Error, Result};
use crate::object::sealed::{Sealed, Target};
use crate::runtime::{Runtime, RuntimeInner};

struct HandleInner {
    runtime: Weak<RuntimeInner>,
    /// `None` only for the undefined sentinel.
    native: Option<NativeId>,
    kind: ValueKind,
    released: AtomicBool,
}

/// A reference to an object, array or function living in a runtime.
///
/// Each handle is counted against its runtime from creation until
/// [`release`](Handle::release). Clones share the same native reference, so
/// releasing any clone releases them all. Use [`twin`](Handle::twin) for an
/// independently counted reference.
///
/// Equality and hashing ask the engine, so two handles obtained separately
/// for the same script value are equal.
#[derive(Clone)]
pub struct Handle(Arc<HandleInner>);

impl Handle {
    pub(crate) fn from_native(runtime: Weak<RuntimeInner>, id: NativeId, kind: ValueKind) -> Self {
        Self(Arc::new(HandleInner {
            runtime,
            native: Some(id),
            kind,
            released: AtomicBool::new(false),
        }))
    }

    /// The undefined sentinel. Never counted; releasing it does nothing.
    pub fn undefined() -> Self {
        Self(Arc::new(HandleInner {
            runtime: Weak::new(),
            native: None,
            kind: ValueKind::Undefined,
            released: AtomicBool::new(false),
        }))
    }

    pub fn kind(&self) -> ValueKind {
        self.0.kind
    }

    pub fn is_undefined(&self) -> bool {
        self.0.native.is_none()
    }

    pub fn is_released(&self) -> bool {
        self.0.released.load(Ordering::SeqCst)
    }

    pub fn native_id(&self) -> Option<NativeId> {
        self.0.native
    }

    /// The owning runtime, if it is still alive.
    pub fn runtime(&self) -> Option<Runtime> {
        self.0.runtime.upgrade().map(|inner| inner.handle())
    }

    pub(crate) fn runtime_inner(&self) -> Option<Arc<RuntimeInner>> {
        self.0.runtime.upgrade()
    }

    /// Runtime and native id for an engine operation. Fails on a released
    /// handle, the sentinel, or a runtime that is released or foreign to the
    /// calling thread.
    pub(crate) fn resolve(&self) -> Result<(Arc<RuntimeInner>, NativeId)> {
        if self.is_released() {
            return Err(Error::Released("Handle"));
        }
        let Some(id) = self.0.native else {
            return Err(Error::argument("Operation not supported on undefined"));
        };
        let runtime = self.0.runtime.upgrade().ok_or(Error::Released("Runtime"))?;
        runtime.check()?;
        Ok((runtime, id))
    }

    pub(crate) fn native_id_or_err(&self) -> Result<NativeId> {
        self.resolve().map(|(_, id)| id)
    }

    pub(crate) fn belongs_to(&self, runtime: &RuntimeInner) -> bool {
        std::ptr::eq(self.0.runtime.as_ptr(), runtime as *const RuntimeInner)
    }

    /// Give the native reference back to the engine. Idempotent: the runtime
    /// counter is decremented exactly once.
    pub fn release(&self) -> Result<()> {
        let Some(id) = self.0.native else {
            return Ok(());
        };
        let Some(runtime) = self.0.runtime.upgrade() else {
            self.0.released.store(true, Ordering::SeqCst);
            return Ok(());
        };
        if runtime.is_released() {
            // the isolate is gone and took every reference with it
            self.0.released.store(true, Ordering::SeqCst);
            return Ok(());
        }
        runtime.locker.check_thread()?;
        if self.0.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::trace!("[runtime:{}] release {}", runtime.name(), id);
        let result = runtime.engine.release_handle(runtime.isolate, id);
        runtime.untrack(id);
        result.map_err(Error::from)
    }

    /// A new, separately counted handle to the same value.
    pub fn twin(&self) -> Result<Handle> {
        if self.is_undefined() {
            return Ok(Handle::undefined());
        }
        let (runtime, id) = self.resolve()?;
        let twin = runtime.engine.create_twin(runtime.isolate, id)?;
        Ok(runtime.track(twin, self.kind()))
    }

    /// Engine identity. Undefined is only equal to undefined.
    pub fn strict_equals(&self, other: &Handle) -> Result<bool> {
        match (self.is_undefined(), other.is_undefined()) {
            (true, true) => return Ok(true),
            (true, false) | (false, true) => return Ok(false),
            (false, false) => {}
        }
        let (runtime, a) = self.resolve()?;
        let (other_runtime, b) = other.resolve()?;
        if !Arc::ptr_eq(&runtime, &other_runtime) {
            return Ok(false);
        }
        Ok(runtime.engine.identity_equals(runtime.isolate, a, b)?)
    }

    /// Engine identity hash. Undefined hashes to zero.
    pub fn identity_hash(&self) -> Result<u32> {
        if self.is_undefined() {
            return Ok(0);
        }
        let (runtime, id) = self.resolve()?;
        Ok(runtime.engine.identity_hash(runtime.isolate, id)?)
    }
}

impl Sealed for Handle {
    fn target(&self) -> Result<Target> {
        let (runtime, id) = self.resolve()?;
        Ok(Target {
            runtime,
            id,
            kind: self.kind(),
        })
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.strict_equals(other).unwrap_or(false)
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_hash().unwrap_or(0).hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.native {
            Some(id) => f
                .debug_struct("Handle")
                .field("id", &id)
                .field("kind", &self.0.kind)
                .field("released", &self.is_released())
                .finish(),
            None => f.write_str("Handle(undefined)"),
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let Some(id) = self.native else { return };
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let Some(runtime) = self.runtime.upgrade() else { return };
        if runtime.is_released() {
            return;
        }
        if runtime.locker.check_thread().is_ok() {
            self.released.store(true, Ordering::SeqCst);
            if let Err(e) = runtime.engine.release_handle(runtime.isolate, id) {
                tracing::warn!("[runtime:{}] releasing dropped {} failed: {}", runtime.name(), id, e);
            }
            runtime.untrack(id);
        } else {
            tracing::warn!(
                "[runtime:{}] {} dropped on a thread without the lock, still counted",
                runtime.name(),
                id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectLike;

    #[test]
    fn test_release_is_idempotent() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        assert_eq!(runtime.object_reference_count(), 1);

        object.release().unwrap();
        object.release().unwrap();
        assert!(object.is_released());
        assert_eq!(runtime.object_reference_count(), 0);
        runtime.release().unwrap();
    }

    #[test]
    fn test_released_handle_fails_fast() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        object.release().unwrap();

        let err = object.get("x").unwrap_err();
        assert!(matches!(err, Error::Released("Handle")));
        runtime.release().unwrap();
    }

    #[test]
    fn test_twins_are_equal_and_hash_equal() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        let twin = object.twin().unwrap();
        assert_eq!(runtime.object_reference_count(), 2);

        assert!(object.strict_equals(&twin).unwrap());
        assert_eq!(object, twin);
        assert_eq!(object.identity_hash().unwrap(), twin.identity_hash().unwrap());

        // releasing one twin leaves the other usable
        twin.release().unwrap();
        object.set("a", 1).unwrap();
        assert_eq!(object.get_integer("a").unwrap(), 1);

        object.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_distinct_objects_are_not_equal() {
        let runtime = Runtime::create().unwrap();
        let a = runtime.new_object().unwrap();
        let b = runtime.new_object().unwrap();
        assert!(!a.strict_equals(&b).unwrap());
        assert_ne!(a, b);
        a.release().unwrap();
        b.release().unwrap();
        runtime.release().unwrap();
    }

    #[test]
    fn test_undefined_sentinel() {
        let undefined = Handle::undefined();
        assert!(undefined.is_undefined());
        assert_eq!(undefined.kind(), ValueKind::Undefined);
        undefined.release().unwrap();
        assert!(undefined.twin().unwrap().is_undefined());
        assert!(undefined.strict_equals(&Handle::undefined()).unwrap());
        assert!(undefined.runtime().is_none());
    }

    #[test]
    fn test_drop_releases_on_owner_thread() {
        let runtime = Runtime::create().unwrap();
        {
            let _object = runtime.new_object().unwrap();
            assert_eq!(runtime.object_reference_count(), 1);
        }
        assert_eq!(runtime.object_reference_count(), 0);
        runtime.release().unwrap();
    }

    #[test]
    fn test_handles_after_runtime_release() {
        let runtime = Runtime::create().unwrap();
        let object = runtime.new_object().unwrap();
        runtime.release_with(false).unwrap();

        assert!(matches!(object.get("x").unwrap_err(), Error::Released("Runtime")));
        object.release().unwrap();
        assert!(object.is_released());
    }
}
