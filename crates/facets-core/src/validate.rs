#![forbid(unsafe_code)]

//! Value validators for attributes and collection items.
//!
//! A validator either accepts a value (possibly coercing it, e.g. an `Int`
//! into a `Float`) or rejects it with a message. Validators should be
//! idempotent: validating an accepted value again yields the same value.

use std::fmt;
use std::rc::Rc;

use crate::error::{FacetError, ValidationContext};
use crate::value::Value;

type CheckFn = dyn Fn(&Value) -> Result<Value, String>;

/// A named, shareable validation function.
#[derive(Clone)]
pub struct Validator {
    name: Rc<str>,
    check: Rc<CheckFn>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Validator").field(&self.name).finish()
    }
}

impl Validator {
    pub fn new(
        name: impl Into<Rc<str>>,
        check: impl Fn(&Value) -> Result<Value, String> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Rc::new(check),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the check.
    ///
    /// # Errors
    ///
    /// Returns the rejection message.
    pub fn check(&self, value: &Value) -> Result<Value, String> {
        (self.check)(value)
    }

    /// Run the check and wrap a rejection as [`FacetError::Validation`].
    pub(crate) fn apply(
        &self,
        context: ValidationContext,
        name: &str,
        value: &Value,
    ) -> Result<Value, FacetError> {
        self.check(value).map_err(|message| FacetError::Validation {
            context,
            name: name.to_string(),
            value: format!("{value:?}"),
            message,
        })
    }

    #[must_use]
    pub fn int() -> Self {
        Self::new("int", |v| match v {
            Value::Int(_) => Ok(v.clone()),
            other => Err(format!("expected an int, found {}", other.type_name())),
        })
    }

    /// Accepts floats and widens ints.
    #[must_use]
    pub fn float() -> Self {
        Self::new("float", |v| {
            v.as_float()
                .map(Value::Float)
                .ok_or_else(|| format!("expected a float, found {}", v.type_name()))
        })
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::new("bool", |v| match v {
            Value::Bool(_) => Ok(v.clone()),
            other => Err(format!("expected a bool, found {}", other.type_name())),
        })
    }

    #[must_use]
    pub fn string() -> Self {
        Self::new("str", |v| match v {
            Value::Str(_) => Ok(v.clone()),
            other => Err(format!("expected a str, found {}", other.type_name())),
        })
    }

    /// Integers within `min..=max`.
    #[must_use]
    pub fn int_range(min: i64, max: i64) -> Self {
        Self::new(format!("int[{min}, {max}]"), move |v| match v {
            Value::Int(i) if (min..=max).contains(i) => Ok(v.clone()),
            Value::Int(i) => Err(format!("{i} is outside [{min}, {max}]")),
            other => Err(format!("expected an int, found {}", other.type_name())),
        })
    }

    /// Objects of the given class, or `None` when `allow_none` is set.
    #[must_use]
    pub fn instance_of(class: impl Into<Rc<str>>, allow_none: bool) -> Self {
        let class: Rc<str> = class.into();
        Self::new(format!("instance of {class}"), move |v| match v {
            Value::Object(o) if o.class_name() == &*class => Ok(v.clone()),
            Value::None if allow_none => Ok(Value::None),
            Value::Object(o) => Err(format!(
                "expected an instance of {class}, found {}",
                o.class_name()
            )),
            other => Err(format!(
                "expected an instance of {class}, found {}",
                other.type_name()
            )),
        })
    }

    /// One of a fixed set of values.
    #[must_use]
    pub fn one_of(choices: impl IntoIterator<Item = Value>) -> Self {
        let choices: Vec<Value> = choices.into_iter().collect();
        Self::new("enum", move |v| {
            if choices.contains(v) {
                Ok(v.clone())
            } else {
                Err(format!("{v:?} is not one of {choices:?}"))
            }
        })
    }
}

/// Validate with an optional validator; `None` accepts everything unchanged.
pub(crate) fn validate_opt(
    validator: Option<&Validator>,
    context: ValidationContext,
    name: &str,
    value: &Value,
) -> Result<Value, FacetError> {
    match validator {
        Some(v) => v.apply(context, name, value),
        None => Ok(value.clone()),
    }
}
