#![forbid(unsafe_code)]

//! Mutation and lookup errors.
//!
//! Every failing operation leaves the object or collection untouched.

use std::fmt;

/// What part of a mutation failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationContext {
    /// A mapping key.
    Key,
    /// A mapping value.
    Value,
    /// A sequence or set element.
    Element,
    /// A whole attribute assignment.
    Attribute,
}

impl ValidationContext {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Value => "value",
            Self::Element => "element",
            Self::Attribute => "attribute",
        }
    }
}

impl fmt::Display for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by object and collection operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacetError {
    /// The object has no attribute with this name.
    MissingAttribute { class: String, name: String },
    /// `add_facet` was called with a name that already exists.
    DuplicateAttribute { class: String, name: String },
    /// A validator rejected a value.
    Validation {
        context: ValidationContext,
        /// Attribute the value was destined for (empty for unowned collections).
        name: String,
        /// Debug rendering of the rejected value.
        value: String,
        message: String,
    },
    /// A sequence operation would leave the length outside its bounds.
    LengthConstraint {
        attempted: usize,
        min: usize,
        max: Option<usize>,
    },
    IndexOutOfRange { index: usize, len: usize },
    KeyNotFound { key: String },
    /// Removal from an empty collection.
    Empty { operation: &'static str },
    /// A value of the wrong shape was assigned to a collection attribute,
    /// or a collection accessor was used on the wrong kind of attribute.
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for FacetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAttribute { class, name } => {
                write!(f, "'{class}' object has no attribute '{name}'")
            }
            Self::DuplicateAttribute { class, name } => {
                write!(f, "'{class}' object already has an attribute '{name}'")
            }
            Self::Validation {
                context,
                name,
                value,
                message,
            } => {
                if name.is_empty() {
                    write!(f, "invalid {context} {value}: {message}")
                } else {
                    write!(f, "invalid {context} {value} for '{name}': {message}")
                }
            }
            Self::LengthConstraint { attempted, min, max } => match max {
                Some(max) => write!(
                    f,
                    "length {attempted} outside the allowed range [{min}, {max}]"
                ),
                None => write!(f, "length {attempted} is below the minimum of {min}"),
            },
            Self::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::KeyNotFound { key } => write!(f, "key not found: {key}"),
            Self::Empty { operation } => write!(f, "{operation} on an empty collection"),
            Self::TypeMismatch {
                name,
                expected,
                found,
            } => write!(f, "attribute '{name}' expects {expected}, found {found}"),
        }
    }
}

impl std::error::Error for FacetError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = FacetError::LengthConstraint {
            attempted: 6,
            min: 2,
            max: Some(5),
        };
        assert_eq!(err.to_string(), "length 6 outside the allowed range [2, 5]");

        let err = FacetError::Validation {
            context: ValidationContext::Key,
            name: "scores".into(),
            value: "Int(3)".into(),
            message: "expected a string".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid key Int(3) for 'scores': expected a string"
        );

        let err = FacetError::MissingAttribute {
            class: "Person".into(),
            name: "age".into(),
        };
        assert_eq!(err.to_string(), "'Person' object has no attribute 'age'");
    }
}
