//! Tether - host-side object model for an embedded script engine
//!
//! A [`Runtime`] owns one engine isolate and is driven by exactly one thread
//! at a time, as arbitrated by its [`Locker`]. Everything obtained from the
//! engine comes back as a [`Handle`] that is counted against the runtime until
//! released.
//!
//! # Architecture
//!
//! - `locker` serialises access to a runtime and detects foreign threads
//! - `runtime` mediates every engine primitive and tracks live handles
//! - `handle` / `value` are the reference and value model
//! - `marshal` translates values and calls in both directions
//! - `bridge` exposes host objects and classes to script

mod array;
mod concurrent;
mod config;
mod error;
mod function;
mod handle;
mod locker;
mod memory_manager;
mod object;
mod runtime;
mod value;

pub mod bridge;
pub mod marshal;
pub mod utils;
pub mod worker;

pub use array::ArrayLike;
pub use concurrent::{ConcurrentRuntime, RuntimeDiagnostics};
pub use config::{RuntimeConfig, ThreadMode};
pub use error::{Error, ErrorKind, Result, WorkerError};
pub use function::Callable;
pub use handle::Handle;
pub use locker::{Locker, LockerGuard, ReadGuard, RwGate, WriteGuard};
pub use memory_manager::MemoryManager;
pub use object::ObjectLike;
pub use runtime::{ReferenceHandler, Runtime, TerminationHandle};
pub use value::{HostValue, Value};

pub use bridge::{ClassInterceptor, HostClass, HostObject, InterceptorContext};
pub use marshal::{Args, CallContext, HandleScope, MethodDescriptor, ParamKind, ScriptFunction, Signature};
pub use worker::{ScriptWorker, spawn_worker, spawn_worker_with_engine};

pub use tether_engine::{Engine, MemoryEngine, NativeId, ScriptOrigin};
pub use tether_types::{ExceptionKind, ReturnKind, ScriptException, ValueKind};
