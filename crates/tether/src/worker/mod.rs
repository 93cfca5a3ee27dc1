//! A runtime on its own thread.
//!
//! [`spawn_worker`] starts a dedicated OS thread that creates and owns one
//! runtime. Callers drive it through a [`ScriptWorker`], which queues
//! commands and awaits one-shot replies, so the runtime's locker never
//! changes hands.

mod command;
mod handle;
mod run;
mod spawn;

pub use handle::ScriptWorker;
pub use spawn::{spawn_worker, spawn_worker_with_engine};
