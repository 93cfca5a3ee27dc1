//! Object bridge.
//!
//! Lets script construct host class instances and call their methods, and
//! lets the host hand its own objects to script. Each bridged object gets a
//! proxy carrying a process-unique id; the bridge maps ids back to host
//! objects through weak references.

mod adapter;
mod class;
mod host_object;
mod interceptor;
mod object_bridge;

pub use adapter::{host_object_of, inject_class, inject_class_into, inject_object};
pub use class::HostClass;
pub use host_object::{HostObject, WeakHostObject};
pub use interceptor::{ClassInterceptor, InterceptorContext};
pub use object_bridge::{OBJECT_ID_KEY, ObjectBridge, Resolved};
