//! Sources the memory engine understands without registration.

use tether_types::{ScriptException, token_span};

use crate::memory::heap::Local;
use crate::memory::scope::{Scope, ScriptInfo, Throw};

/// Evaluate empty sources, JSON literals, `undefined`, `this` and global
/// property paths such as `config.limits.max`. Anything else is `None`.
pub(crate) fn evaluate(scope: &Scope<'_>, source: &str) -> Option<Result<Local, Throw>> {
    let text = source.trim();
    let text = text.strip_suffix(';').unwrap_or(text).trim_end();

    if text.is_empty() || text == "undefined" {
        return Some(Ok(Local::Undefined));
    }
    if text == "this" {
        return Some(Ok(scope.global()));
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
        return Some(Ok(scope.import_json(&json)));
    }
    if is_path(text) {
        return Some(read_path(scope, text));
    }
    None
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn is_path(text: &str) -> bool {
    text.split('.').all(is_identifier)
}

fn read_path(scope: &Scope<'_>, text: &str) -> Result<Local, Throw> {
    let mut segments = text.split('.');
    let first = segments.next().unwrap_or_default();
    let mut value = scope.get_global(first)?;
    for segment in segments {
        value = scope.get(&value, segment)?;
    }
    Ok(value)
}

/// Diagnostic for a source that is neither native nor registered.
pub(crate) fn syntax_error(script: &ScriptInfo) -> ScriptException {
    let (index, line) = script
        .source
        .lines()
        .enumerate()
        .find(|(_, l)| !l.trim().is_empty())
        .unwrap_or((0, ""));
    let token = line.split_whitespace().next().unwrap_or("");
    let (start, end) = token_span(line, token);
    let message = if token.chars().next().is_some_and(|c| c.is_alphabetic()) {
        "SyntaxError: Unexpected identifier".to_string()
    } else {
        format!("SyntaxError: Unexpected token '{}'", token.chars().next().unwrap_or(' '))
    };

    ScriptException::compilation(&script.name, script.line_offset + index as u32 + 1, message)
        .with_source_line(line, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert!(is_path("a"));
        assert!(is_path("config.limits.$max"));
        assert!(!is_path("a..b"));
        assert!(!is_path("1abc"));
        assert!(!is_path("a + b"));
    }

    #[test]
    fn test_syntax_error_location() {
        let script = ScriptInfo::new("broken.js", 10, "\n  foo bar(;\n");
        let err = syntax_error(&script);
        assert!(err.is_compilation());
        assert_eq!(err.line_number, 12);
        assert_eq!(err.source_line, "  foo bar(;");
        assert_eq!((err.start_column, err.end_column), (2, 5));
    }
}
