//! Structured script failures.
//!
//! Engines report compile and runtime failures with enough location data to
//! rebuild a compiler-style diagnostic:
//!
//! ```text
//! script.js:3: ReferenceError: foo is not defined
//! let x = foo + 1;
//!         ^^^
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which phase of script handling failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// The source never ran because it failed to parse.
    Compilation,
    /// The script threw while running.
    Execution,
}

/// A failure raised by script code, with its source location.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", self.diagnostic())]
pub struct ScriptException {
    pub kind: ExceptionKind,
    pub file_name: String,
    pub line_number: u32,
    pub message: String,
    pub source_line: String,
    pub start_column: u32,
    pub end_column: u32,
    pub stack_trace: Option<String>,
    /// Host error that caused the script to throw, when a host callback failed.
    #[source]
    pub cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl ScriptException {
    fn new(kind: ExceptionKind, file_name: &str, line_number: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            file_name: file_name.to_string(),
            line_number,
            message: message.into(),
            source_line: String::new(),
            start_column: 0,
            end_column: 0,
            stack_trace: None,
            cause: None,
        }
    }

    pub fn compilation(file_name: &str, line_number: u32, message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Compilation, file_name, line_number, message)
    }

    pub fn execution(file_name: &str, line_number: u32, message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Execution, file_name, line_number, message)
    }

    /// Attach the offending source line and the column span to underline.
    pub fn with_source_line(mut self, line: impl Into<String>, start: u32, end: u32) -> Self {
        self.source_line = line.into();
        self.start_column = start;
        self.end_column = end.max(start);
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn is_compilation(&self) -> bool {
        self.kind == ExceptionKind::Compilation
    }

    /// `file:line: message`, the source line, then a caret underline.
    pub fn diagnostic(&self) -> String {
        let mut out = format!("{}:{}: {}\n", self.file_name, self.line_number, self.message);
        out.push_str(&self.source_line);
        out.push('\n');
        out.push_str(&" ".repeat(self.start_column as usize));
        out.push_str(&"^".repeat(self.end_column.saturating_sub(self.start_column) as usize));
        if let Some(stack) = &self.stack_trace {
            out.push('\n');
            out.push_str(stack);
        }
        out
    }
}

impl PartialEq for ScriptException {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.file_name == other.file_name
            && self.line_number == other.line_number
            && self.message == other.message
            && self.source_line == other.source_line
            && self.start_column == other.start_column
            && self.end_column == other.end_column
    }
}

/// Column span helper for engines that only know the offending token.
pub fn token_span(line: &str, token: &str) -> (u32, u32) {
    match line.find(token) {
        Some(start) => (start as u32, (start + token.len()) as u32),
        None => (0, 1),
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Compilation => f.write_str("compilation"),
            ExceptionKind::Execution => f.write_str("execution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_layout() {
        let err = ScriptException::compilation("script.js", 3, "SyntaxError: Unexpected token")
            .with_source_line("let x = foo + 1;", 8, 11);

        assert_eq!(
            err.to_string(),
            "script.js:3: SyntaxError: Unexpected token\nlet x = foo + 1;\n        ^^^"
        );
        assert!(err.is_compilation());
    }

    #[test]
    fn test_stack_trace_appended() {
        let err = ScriptException::execution("a.js", 1, "Error: boom")
            .with_source_line("boom()", 0, 4)
            .with_stack_trace("Error: boom\n    at a.js:1");
        assert!(err.to_string().ends_with("^^^^\nError: boom\n    at a.js:1"));
    }

    #[test]
    fn test_cause_is_source() {
        let cause: Arc<dyn StdError + Send + Sync> =
            Arc::new(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        let err = ScriptException::execution("a.js", 1, "Error: disk").with_cause(cause);
        let source = StdError::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk"));
    }

    #[test]
    fn test_token_span() {
        assert_eq!(token_span("let x = foo;", "foo"), (8, 11));
        assert_eq!(token_span("abc", "zzz"), (0, 1));
    }
}
