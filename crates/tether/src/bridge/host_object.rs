use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;

use crate::error::{Error, Result};
use crate::marshal::short_type_name;

type Cell<T> = ReentrantMutex<RefCell<T>>;

/// A host value shared with script through a bridge proxy.
///
/// The bridge only ever holds a [`WeakHostObject`], so a host object lives as
/// long as the host (or a script-constructed instance list) keeps a strong
/// clone.
///
/// Access is re-entrant on the owning thread: a method that calls back into
/// script, which in turn calls another method on the same object, gets an
/// argument error for the conflicting borrow rather than a deadlock.
#[derive(Clone)]
pub struct HostObject {
    inner: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl HostObject {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        let cell: Cell<T> = ReentrantMutex::new(RefCell::new(value));
        Self {
            inner: Arc::new(cell),
            type_id: TypeId::of::<T>(),
            type_name: short_type_name(type_name::<T>()),
        }
    }

    /// `TypeId` of the wrapped value.
    pub fn value_type(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    fn cell<T: 'static>(&self) -> Result<&Cell<T>> {
        self.inner.downcast_ref::<Cell<T>>().ok_or_else(|| {
            Error::argument(format!(
                "Host object is a {}, not a {}",
                self.type_name,
                short_type_name(type_name::<T>())
            ))
        })
    }

    pub fn with<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let cell = self.cell::<T>()?;
        let guard = cell.lock();
        let value = guard
            .try_borrow()
            .map_err(|_| Error::argument(format!("{} is being modified", self.type_name)))?;
        Ok(f(&value))
    }

    pub fn with_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let cell = self.cell::<T>()?;
        let guard = cell.lock();
        let mut value = guard
            .try_borrow_mut()
            .map_err(|_| Error::argument(format!("{} is already borrowed", self.type_name)))?;
        Ok(f(&mut value))
    }

    pub fn downgrade(&self) -> WeakHostObject {
        WeakHostObject {
            inner: Arc::downgrade(&self.inner),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject<{}>@{:x}", self.type_name, self.address())
    }
}

/// Non-owning reference kept by the bridge's identifier table.
#[derive(Clone)]
pub struct WeakHostObject {
    inner: Weak<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl WeakHostObject {
    pub fn upgrade(&self) -> Option<HostObject> {
        self.inner.upgrade().map(|inner| HostObject {
            inner,
            type_id: self.type_id,
            type_name: self.type_name,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakHostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakHostObject<{}>", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        count: i32,
    }

    #[test]
    fn test_typed_access() {
        let object = HostObject::new(Counter { count: 1 });
        assert!(object.is::<Counter>());
        assert_eq!(object.type_name(), "Counter");

        object.with_mut(|c: &mut Counter| c.count += 4).unwrap();
        assert_eq!(object.with(|c: &Counter| c.count).unwrap(), 5);
        assert!(matches!(object.with(|s: &String| s.len()), Err(Error::Argument(_))));
    }

    #[test]
    fn test_reentrant_borrow_is_an_error() {
        let object = HostObject::new(Counter { count: 0 });
        let nested = object
            .with_mut(|_: &mut Counter| object.with(|c: &Counter| c.count))
            .unwrap();
        assert!(matches!(nested, Err(Error::Argument(_))));
    }

    #[test]
    fn test_weak_reference_ages_out() {
        let object = HostObject::new(Counter { count: 0 });
        let weak = object.downgrade();
        assert!(weak.upgrade().unwrap().ptr_eq(&object));
        drop(object);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
