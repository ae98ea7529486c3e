#![forbid(unsafe_code)]

//! Dynamic attribute values.
//!
//! # Invariants
//!
//! 1. Objects compare and hash by identity.
//! 2. Collections compare by contents. Their hash covers only the variant,
//!    so a collection mutated while used as a key stays reachable.
//! 3. Floats compare bitwise, so `NaN == NaN` and `0.0 != -0.0`. This keeps
//!    `Eq` and `Hash` consistent for map keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::collections::{FacetDict, FacetList, FacetSet};
use crate::object::Object;

/// A dynamically typed attribute value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Object(Object),
    List(FacetList),
    Dict(FacetDict),
    Set(FacetSet),
}

impl Value {
    /// An unowned, unconstrained list.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(FacetList::unchecked(items.into_iter().collect()))
    }

    /// An unowned, unconstrained dict.
    #[must_use]
    pub fn dict(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Self::Dict(FacetDict::unchecked(entries.into_iter().collect()))
    }

    /// An unowned, unconstrained set.
    #[must_use]
    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Set(FacetSet::unchecked(items.into_iter().collect()))
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Object(_) => "object",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&FacetList> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dict(&self) -> Option<&FacetDict> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&FacetSet> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
            Self::Object(_) => 4,
            Self::List(_) => 5,
            Self::Dict(_) => 6,
            Self::Set(_) => 7,
        }
    }

    /// Total order used by [`FacetList::sort`].
    ///
    /// Values of different kinds order by kind; numbers compare numerically
    /// across `Int` and `Float`; objects order by creation; lists compare
    /// lexicographically; dicts and sets compare by length.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                let a = self.as_float().unwrap_or_default();
                let b = other.as_float().unwrap_or_default();
                a.total_cmp(&b)
            }
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Object(a), Self::Object(b)) => a.id().cmp(&b.id()),
            (Self::List(a), Self::List(b)) => {
                let (a, b) = (a.to_vec(), b.to_vec());
                a.iter()
                    .zip(&b)
                    .map(|(x, y)| x.total_cmp(y))
                    .find(|ord| ord.is_ne())
                    .unwrap_or_else(|| a.len().cmp(&b.len()))
            }
            (Self::Dict(a), Self::Dict(b)) => a.len().cmp(&b.len()),
            (Self::Set(a), Self::Set(b)) => a.len().cmp(&b.len()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Dict(a), Self::Dict(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::None | Self::List(_) | Self::Dict(_) | Self::Set(_) => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(x) => x.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::Object(o) => o.id().hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x:?})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Object(o) => fmt::Debug::fmt(o, f),
            Self::List(l) => fmt::Debug::fmt(l, f),
            Self::Dict(d) => fmt::Debug::fmt(d, f),
            Self::Set(s) => fmt::Debug::fmt(s, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Self::Str(s)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl From<FacetList> for Value {
    fn from(l: FacetList) -> Self {
        Self::List(l)
    }
}

impl From<FacetDict> for Value {
    fn from(d: FacetDict) -> Self {
        Self::Dict(d)
    }
}

impl From<FacetSet> for Value {
    fn from(s: FacetSet) -> Self {
        Self::Set(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::None, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn collections_compare_by_contents() {
        let a = Value::list([Value::Int(1), Value::Int(2)]);
        let b = Value::list([Value::Int(1), Value::Int(2)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, Value::list([Value::Int(2), Value::Int(1)]));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Object::builder("Thing").build();
        let b = Object::builder("Thing").build();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn total_cmp_mixes_numbers() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(1.5)), Ordering::Greater);
        assert_eq!(Value::None.total_cmp(&Value::Int(0)), Ordering::Less);
        assert_eq!(
            Value::from("a").total_cmp(&Value::from("b")),
            Ordering::Less
        );
    }

    #[test]
    fn option_conversion() {
        assert!(Value::from(None::<i64>).is_none());
        assert_eq!(Value::from(Some("x")).as_str(), Some("x"));
    }
}
