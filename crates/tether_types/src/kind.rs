//! Type tags for values living in the engine heap.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Value kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed set of types a value obtained from the engine can report.
///
/// Anything the engine cannot express with one of the concrete tags comes back
/// as `Unsupported` so callers can degrade instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Undefined,
    Null,
    Integer,
    Double,
    Boolean,
    String,
    Object,
    Array,
    Function,
    Unsupported,
}

impl ValueKind {
    /// Human readable name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
            ValueKind::Function => "function",
            ValueKind::Unsupported => "unsupported",
        }
    }

    /// Whether values of this kind are backed by a native reference.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ValueKind::Object | ValueKind::Array | ValueKind::Function | ValueKind::Unsupported
        )
    }

    /// `null` and `undefined` both mean "no value" for typed results.
    pub fn is_absent(&self) -> bool {
        matches!(self, ValueKind::Undefined | ValueKind::Null)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Return kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Declared return type of a host callback, used to coerce what the host
/// hands back before it reaches script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// The host result is discarded and script sees `undefined`.
    Void,
    /// Whatever the host returns is passed through as-is.
    #[default]
    Any,
    Integer,
    Double,
    Boolean,
    String,
    Object,
    Array,
    Function,
}

impl ReturnKind {
    /// Whether a value of `kind` satisfies this declaration.
    ///
    /// `null`/`undefined` are accepted for reference kinds and strings.
    /// Integers are accepted where a double is declared.
    pub fn accepts(&self, kind: ValueKind) -> bool {
        match self {
            ReturnKind::Void | ReturnKind::Any => true,
            ReturnKind::Integer => kind == ValueKind::Integer,
            ReturnKind::Double => matches!(kind, ValueKind::Double | ValueKind::Integer),
            ReturnKind::Boolean => kind == ValueKind::Boolean,
            ReturnKind::String => kind == ValueKind::String || kind.is_absent(),
            ReturnKind::Object => {
                matches!(kind, ValueKind::Object | ValueKind::Array | ValueKind::Function)
                    || kind.is_absent()
            }
            ReturnKind::Array => kind == ValueKind::Array || kind.is_absent(),
            ReturnKind::Function => kind == ValueKind::Function || kind.is_absent(),
        }
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnKind::Void => "void",
            ReturnKind::Any => "any",
            ReturnKind::Integer => "integer",
            ReturnKind::Double => "double",
            ReturnKind::Boolean => "boolean",
            ReturnKind::String => "string",
            ReturnKind::Object => "object",
            ReturnKind::Array => "array",
            ReturnKind::Function => "function",
        };
        f.write_str(name)
    }
}
