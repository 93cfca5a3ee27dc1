//! Tether Engine - the primitive boundary to a foreign script engine
//!
//! The host core never talks to an interpreter directly. It goes through the
//! [`Engine`] trait, a fixed set of primitives: isolates, script execution,
//! property and element access, function invocation, handle bookkeeping and
//! host callback registration.
//!
//! [`MemoryEngine`] is an in-process heap implementing that boundary. It does
//! not interpret a language: scripts are either literal values, global
//! property paths, or sources registered ahead of time as Rust programs
//! written against [`Scope`].

mod engine;
mod error;
pub mod memory;

pub use engine::*;
pub use error::*;
pub use memory::{Local, MemoryEngine, ObjectRef, Program, Scope, Throw};

pub use tether_types::{ExceptionKind, ReturnKind, ScriptException, ValueKind};
