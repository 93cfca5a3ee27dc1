//! Declared parameter lists for host callbacks.

use std::any::{TypeId, type_name};
use std::fmt;

/// A host type a bridged object must have to bind to a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostType {
    id: TypeId,
    name: &'static str,
}

impl HostType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name(type_name::<T>()),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// `a::b::Counter` → `Counter`, leaving generic arguments alone.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    if full.contains('<') {
        return full;
    }
    full.rsplit("::").next().unwrap_or(full)
}

/// What a single parameter accepts from script.
///
/// Numeric parameters follow the widening order
/// short → int → long → float → double and never narrow. Script integers
/// therefore bind to `Int`, `Long`, `Float` and `Double`, and script doubles
/// only to `Double`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Short,
    Int,
    Long,
    Float,
    Double,
    Bool,
    /// A script string, or `null`/`undefined`.
    String,
    /// Any object, array or function, passed through as a handle.
    Handle,
    /// Anything, passed through unchanged.
    Any,
    /// A bridged host object of the given type.
    Host(HostType),
    /// A script array whose elements all bind to the inner kind.
    Array(Box<ParamKind>),
    /// A script function, wrapped so the host can call back into it.
    Function,
}

impl ParamKind {
    pub fn host<T: 'static>() -> Self {
        ParamKind::Host(HostType::of::<T>())
    }

    pub fn array_of(element: ParamKind) -> Self {
        ParamKind::Array(Box::new(element))
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Short => f.write_str("short"),
            ParamKind::Int => f.write_str("int"),
            ParamKind::Long => f.write_str("long"),
            ParamKind::Float => f.write_str("float"),
            ParamKind::Double => f.write_str("double"),
            ParamKind::Bool => f.write_str("boolean"),
            ParamKind::String => f.write_str("String"),
            ParamKind::Handle => f.write_str("Handle"),
            ParamKind::Any => f.write_str("Object"),
            ParamKind::Host(t) => f.write_str(t.name()),
            ParamKind::Array(inner) => write!(f, "{}[]", inner),
            ParamKind::Function => f.write_str("Function"),
        }
    }
}

/// One overload's parameter list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    params: Vec<ParamKind>,
    varargs: bool,
}

impl Signature {
    pub fn new(params: impl IntoIterator<Item = ParamKind>) -> Self {
        Self {
            params: params.into_iter().collect(),
            varargs: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The last parameter is the element kind of a trailing variadic list,
    /// collected into an array. A signature with no parameters stays fixed.
    pub fn varargs(params: impl IntoIterator<Item = ParamKind>) -> Self {
        let params: Vec<_> = params.into_iter().collect();
        let varargs = !params.is_empty();
        Self { params, varargs }
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    pub fn is_varargs(&self) -> bool {
        self.varargs
    }

    /// Whether `count` script arguments can bind to this signature at all.
    pub fn accepts_arity(&self, count: usize) -> bool {
        if self.varargs {
            count + 1 >= self.params.len()
        } else {
            count == self.params.len()
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if self.varargs && i == last {
                write!(f, "{}...", param)?;
            } else {
                write!(f, "{}", param)?;
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    #[test]
    fn test_host_type_name() {
        assert_eq!(HostType::of::<Counter>().name(), "Counter");
        assert_eq!(HostType::of::<Counter>(), HostType::of::<Counter>());
        assert_ne!(HostType::of::<Counter>(), HostType::of::<String>());
    }

    #[test]
    fn test_arity() {
        let fixed = Signature::new([ParamKind::Int, ParamKind::Int]);
        assert!(fixed.accepts_arity(2));
        assert!(!fixed.accepts_arity(1));
        assert!(!fixed.accepts_arity(3));

        let variadic = Signature::varargs([ParamKind::String, ParamKind::Int]);
        assert!(variadic.accepts_arity(1));
        assert!(variadic.accepts_arity(4));
        assert!(!variadic.accepts_arity(0));

        assert!(Signature::varargs([]).accepts_arity(0));
        assert!(!Signature::varargs([]).is_varargs());
    }

    #[test]
    fn test_display() {
        let sig = Signature::varargs([ParamKind::array_of(ParamKind::Double), ParamKind::Int]);
        assert_eq!(sig.to_string(), "(double[], int...)");
        assert_eq!(Signature::empty().to_string(), "()");
    }
}
