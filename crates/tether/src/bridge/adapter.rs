//! Entry points for exposing host classes and objects to script.

use crate::error::Result;
use crate::handle::Handle;
use crate::object::ObjectLike;
use crate::runtime::Runtime;

use super::{HostClass, HostObject, Resolved};

/// Make `class` constructible from script as a global named after it.
pub fn inject_class<T: Send + 'static>(runtime: &Runtime, class: HostClass<T>) -> Result<()> {
    let inner = runtime.inner();
    inner.check()?;
    inner.bridge.register_class(inner, class.erase(), inner.global)
}

/// Like [`inject_class`], with the constructor installed on `root` instead of
/// the global object.
pub fn inject_class_into<T: Send + 'static>(root: &Handle, class: HostClass<T>) -> Result<()> {
    let (inner, id) = root.resolve()?;
    inner.bridge.register_class(&inner, class.erase(), id)
}

/// Expose `object` as the global `name`. Its class must be registered.
/// Returns the object id.
pub fn inject_object(runtime: &Runtime, name: &str, object: &HostObject) -> Result<String> {
    let inner = runtime.inner();
    inner.check()?;
    let proxy = inner.bridge.proxy_for(inner, object)?;
    let set = runtime.set(name, &proxy);
    let id = inner.bridge.id_of(object);
    proxy.release()?;
    set?;
    Ok(id.unwrap_or_default())
}

/// Host object behind a script value.
pub fn host_object_of(handle: &Handle) -> Result<Resolved> {
    let (inner, _) = handle.resolve()?;
    inner.bridge.resolve(&inner, handle)
}

#[cfg(test)]
mod tests;
