//! Callback marshaller.
//!
//! Translates values and calls in both directions:
//!
//! - script → host: the engine re-enters through [`HostDispatch`] with a
//!   callback id; arguments are coerced against the registered overloads in
//!   registration order and the first that fits runs.
//! - host → script: host values become script primitives, fresh arrays, or
//!   bridge proxies for host objects.
//!
//! Handles created while marshalling are scoped and released on every exit
//! path.
//!
//! [`HostDispatch`]: tether_engine::HostDispatch

mod coerce;
mod convert;
mod dispatch;
mod function;
mod registry;
mod scope;
mod signature;

pub use function::ScriptFunction;
pub use registry::{Args, CallContext, MethodDescriptor};
pub use scope::HandleScope;
pub use signature::{HostType, ParamKind, Signature};

pub(crate) use coerce::{AGED_OUT, NOT_HOST, first_fit};
pub(crate) use convert::to_engine;
pub(crate) use registry::{CallbackRegistry, Overload};
pub(crate) use signature::short_type_name;
