#![forbid(unsafe_code)]

use std::fmt;

use facets_core::FacetError;
use facets_path::SyntaxError;

/// Error raised by [`Runtime::observe`](crate::Runtime::observe).
///
/// Registration is all-or-nothing: when `observe` fails, no binding of the
/// attempted subscription remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveError {
    /// The pattern text did not parse.
    Syntax(SyntaxError),
    /// A non-optional pattern segment named an attribute the object lacks.
    MissingAttribute { class: String, name: String },
    /// The handler shape cannot be served by this pattern.
    SignatureIncompatible { pattern: String, reason: String },
    /// No dispatcher is registered under this name.
    UnknownDispatch(String),
    /// An object operation failed while binding.
    Facet(FacetError),
}

impl fmt::Display for ObserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(err) => write!(f, "syntax error: {err}"),
            Self::MissingAttribute { class, name } => {
                write!(f, "'{class}' object has no attribute '{name}'")
            }
            Self::SignatureIncompatible { pattern, reason } => {
                write!(f, "handler incompatible with '{pattern}': {reason}")
            }
            Self::UnknownDispatch(name) => write!(f, "unknown dispatch policy '{name}'"),
            Self::Facet(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ObserveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Syntax(err) => Some(err),
            Self::Facet(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SyntaxError> for ObserveError {
    fn from(err: SyntaxError) -> Self {
        Self::Syntax(err)
    }
}

impl From<FacetError> for ObserveError {
    fn from(err: FacetError) -> Self {
        match err {
            FacetError::MissingAttribute { class, name } => Self::MissingAttribute { class, name },
            other => Self::Facet(other),
        }
    }
}
