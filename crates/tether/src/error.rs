//! Error types for the host core.

use tether_engine::EngineError;
use tether_types::{ScriptException, ValueKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by runtime, handle, marshalling and bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid thread access: runtime is not locked by the current thread")]
    ThreadViolation,

    #[error("{0} has been released")]
    Released(&'static str),

    #[error("{0} Object(s) still exist in runtime")]
    OutstandingHandles(usize),

    #[error("Result type mismatch: expected {expected}, got {actual}")]
    ResultTypeMismatch { expected: ValueKind, actual: ValueKind },

    #[error("Undefined result: expected {expected}")]
    UndefinedResult { expected: ValueKind },

    #[error(transparent)]
    Script(#[from] ScriptException),

    #[error("Execution terminated")]
    Terminated,

    #[error("No signature exists for {name} with parameters [{arguments}].")]
    NoMatchingSignature { name: String, arguments: String },

    #[error("{0}")]
    Argument(String),

    #[error("Engine failure: {0}")]
    Engine(#[source] EngineError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ThreadAffinity,
    State,
    TypeMismatch,
    UndefinedResult,
    Script,
    Argument,
    Engine,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ThreadViolation => ErrorKind::ThreadAffinity,
            Error::Released(_) | Error::OutstandingHandles(_) => ErrorKind::State,
            Error::ResultTypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::UndefinedResult { .. } => ErrorKind::UndefinedResult,
            Error::Script(_) | Error::Terminated => ErrorKind::Script,
            Error::NoMatchingSignature { .. } | Error::Argument(_) => ErrorKind::Argument,
            Error::Engine(_) => ErrorKind::Engine,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Error::Argument(message.into())
    }

    pub(crate) fn mismatch(expected: ValueKind, actual: ValueKind) -> Self {
        Error::ResultTypeMismatch { expected, actual }
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Script(e) => Error::Script(e),
            EngineError::Terminated => Error::Terminated,
            other => Error::Engine(other),
        }
    }
}

/// Errors that can occur driving a [`ScriptWorker`](crate::ScriptWorker).
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Worker thread panicked")]
    ThreadPanic,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Worker failed to start: {0}")]
    Init(String),

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outstanding_message_names_count() {
        assert_eq!(
            Error::OutstandingHandles(3).to_string(),
            "3 Object(s) still exist in runtime"
        );
    }

    #[test]
    fn test_engine_errors_map_to_kinds() {
        let script: Error = EngineError::Script(ScriptException::execution("a.js", 1, "Error: x")).into();
        assert_eq!(script.kind(), ErrorKind::Script);

        let terminated: Error = EngineError::Terminated.into();
        assert!(matches!(terminated, Error::Terminated));

        let engine: Error = EngineError::NotCallable.into();
        assert_eq!(engine.kind(), ErrorKind::Engine);
    }

    #[test]
    fn test_mismatch_and_undefined_are_distinct() {
        let mismatch = Error::mismatch(ValueKind::Integer, ValueKind::String);
        let undefined = Error::UndefinedResult {
            expected: ValueKind::Integer,
        };
        assert_eq!(mismatch.kind(), ErrorKind::TypeMismatch);
        assert_eq!(undefined.kind(), ErrorKind::TypeMismatch);
        assert!(!matches!(mismatch, Error::UndefinedResult { .. }));
    }
}
