//! Tether Types - values shared by the engine boundary and the host core
//!
//! Nothing in here touches an engine or a runtime. These are the tags and
//! diagnostics both sides of the boundary agree on.

mod exception;
mod kind;

pub use exception::*;
pub use kind::*;
