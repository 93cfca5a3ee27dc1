//! Error types for the engine boundary.

use tether_types::{ScriptException, ValueKind};

use crate::engine::{IsolateId, NativeId};

/// Errors reported by an [`Engine`](crate::Engine) primitive.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Script(ScriptException),

    #[error("Execution terminated")]
    Terminated,

    #[error("Unknown isolate: {0}")]
    UnknownIsolate(IsolateId),

    #[error("Unknown handle: {0}")]
    UnknownHandle(NativeId),

    #[error("Handle {handle} is {actual}, expected {expected}")]
    WrongKind {
        handle: NativeId,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Value is not callable")]
    NotCallable,
}

impl From<ScriptException> for EngineError {
    fn from(err: ScriptException) -> Self {
        EngineError::Script(err)
    }
}
