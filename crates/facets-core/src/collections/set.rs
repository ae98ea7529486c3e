#![forbid(unsafe_code)]

//! Observable set.
//!
//! Each operation reports the members it actually added and removed,
//! computed against the contents before the call.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;

use super::{Link, Subscription};
use crate::error::{FacetError, ValidationContext};
use crate::event::{ChangeEvent, SetDiff};
use crate::object::WeakObject;
use crate::validate::{Validator, validate_opt};
use crate::value::Value;

type ValueSet = IndexSet<Value, FxBuildHasher>;

/// Constraints for a [`FacetSet`].
#[derive(Debug, Clone)]
pub struct SetSpec {
    item: Option<Validator>,
    has_items: bool,
}

impl Default for SetSpec {
    fn default() -> Self {
        Self {
            item: None,
            has_items: true,
        }
    }
}

impl SetSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn item(mut self, validator: Validator) -> Self {
        self.item = Some(validator);
        self
    }

    #[must_use]
    pub fn items(mut self, has_items: bool) -> Self {
        self.has_items = has_items;
        self
    }

    #[must_use]
    pub fn has_items(&self) -> bool {
        self.has_items
    }
}

struct SetInner {
    members: ValueSet,
    spec: SetSpec,
    link: Link,
}

/// Shared, observable, insertion-ordered set.
#[derive(Clone)]
pub struct FacetSet {
    inner: Rc<RefCell<SetInner>>,
}

impl FacetSet {
    #[must_use]
    pub fn new(spec: SetSpec) -> Self {
        Self::from_parts(spec, ValueSet::default())
    }

    pub fn with_items(
        spec: SetSpec,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Self, FacetError> {
        Self::validated(spec, items.into_iter().collect(), "")
    }

    pub(crate) fn unchecked(items: Vec<Value>) -> Self {
        Self::from_parts(SetSpec::default(), items.into_iter().collect())
    }

    pub(crate) fn seeded(spec: SetSpec, items: Vec<Value>) -> Self {
        Self::from_parts(spec, items.into_iter().collect())
    }

    pub(crate) fn validated(spec: SetSpec, items: Vec<Value>, name: &str) -> Result<Self, FacetError> {
        let members = items
            .iter()
            .map(|v| validate_opt(spec.item.as_ref(), ValidationContext::Element, name, v))
            .collect::<Result<ValueSet, _>>()?;
        Ok(Self::from_parts(spec, members))
    }

    fn from_parts(spec: SetSpec, members: ValueSet) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SetInner {
                members,
                spec,
                link: Link::default(),
            })),
        }
    }

    pub(crate) fn attach(&self, owner: WeakObject, name: Rc<str>) {
        self.inner.borrow_mut().link.attach(owner, name);
    }

    pub(crate) fn detach(&self) {
        self.inner.borrow_mut().link.detach();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().members.is_empty()
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.inner.borrow().members.contains(value)
    }

    /// Members in insertion order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().members.iter().cloned().collect()
    }

    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + 'static) -> Subscription {
        self.inner.borrow_mut().link.subscribe(callback)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Add `value`; returns whether it was new.
    pub fn add(&self, value: Value) -> Result<bool, FacetError> {
        let added = self.validate(vec![value])?;
        let diff = self.commit(|members| SetDiff {
            added: added.into_iter().filter(|v| members.insert(v.clone())).collect(),
            removed: Vec::new(),
        });
        let was_new = !diff.added.is_empty();
        self.emit(diff);
        Ok(was_new)
    }

    /// Remove `value`.
    ///
    /// # Errors
    ///
    /// [`FacetError::KeyNotFound`] if absent.
    pub fn remove(&self, value: &Value) -> Result<(), FacetError> {
        if self.discard(value) {
            Ok(())
        } else {
            Err(FacetError::KeyNotFound {
                key: format!("{value:?}"),
            })
        }
    }

    /// Remove `value` if present; returns whether it was.
    pub fn discard(&self, value: &Value) -> bool {
        let diff = self.commit(|members| SetDiff {
            added: Vec::new(),
            removed: members.shift_take(value).into_iter().collect(),
        });
        let was_present = !diff.removed.is_empty();
        self.emit(diff);
        was_present
    }

    /// Remove and return the most recently added member.
    pub fn pop(&self) -> Result<Value, FacetError> {
        let mut popped = None;
        let diff = self.commit(|members| {
            popped = members.pop();
            SetDiff {
                added: Vec::new(),
                removed: popped.iter().cloned().collect(),
            }
        });
        self.emit(diff);
        popped.ok_or(FacetError::Empty { operation: "pop" })
    }

    pub fn clear(&self) {
        let diff = self.commit(|members| SetDiff {
            added: Vec::new(),
            removed: std::mem::take(members).into_iter().collect(),
        });
        self.emit(diff);
    }

    /// Union in place.
    pub fn update(&self, values: impl IntoIterator<Item = Value>) -> Result<(), FacetError> {
        let values = self.validate(values.into_iter().collect())?;
        let diff = self.commit(|members| SetDiff {
            added: values.into_iter().filter(|v| members.insert(v.clone())).collect(),
            removed: Vec::new(),
        });
        self.emit(diff);
        Ok(())
    }

    /// Keep only members also in `values`.
    pub fn intersection_update(&self, values: impl IntoIterator<Item = Value>) {
        let keep: ValueSet = values.into_iter().collect();
        let diff = self.commit(|members| {
            let removed: Vec<Value> = members.iter().filter(|v| !keep.contains(*v)).cloned().collect();
            members.retain(|v| keep.contains(v));
            SetDiff {
                added: Vec::new(),
                removed,
            }
        });
        self.emit(diff);
    }

    /// Remove every member found in `values`.
    pub fn difference_update(&self, values: impl IntoIterator<Item = Value>) {
        let diff = self.commit(|members| SetDiff {
            added: Vec::new(),
            removed: values
                .into_iter()
                .filter_map(|v| members.shift_take(&v))
                .collect(),
        });
        self.emit(diff);
    }

    /// Members in exactly one of `self` and `values`.
    ///
    /// `{1, 2} ^ {2, 3}` leaves `{1, 3}`, removing `2` and adding `3`.
    pub fn symmetric_difference_update(
        &self,
        values: impl IntoIterator<Item = Value>,
    ) -> Result<(), FacetError> {
        let values: ValueSet = self.validate(values.into_iter().collect())?.into_iter().collect();
        let diff = self.commit(|members| {
            let mut diff = SetDiff::default();
            for value in values {
                if let Some(old) = members.shift_take(&value) {
                    diff.removed.push(old);
                } else {
                    members.insert(value.clone());
                    diff.added.push(value);
                }
            }
            diff
        });
        self.emit(diff);
        Ok(())
    }

    fn validate(&self, values: Vec<Value>) -> Result<Vec<Value>, FacetError> {
        let (validator, name) = {
            let inner = self.inner.borrow();
            (inner.spec.item.clone(), inner.link.name().to_string())
        };
        values
            .iter()
            .map(|v| validate_opt(validator.as_ref(), ValidationContext::Element, &name, v))
            .collect()
    }

    fn commit<R>(&self, f: impl FnOnce(&mut ValueSet) -> R) -> R {
        f(&mut self.inner.borrow_mut().members)
    }

    fn emit(&self, diff: SetDiff) {
        if diff.added.is_empty() && diff.removed.is_empty() {
            return;
        }
        let targets = {
            let mut inner = self.inner.borrow_mut();
            let has_items = inner.spec.has_items;
            inner.link.targets(has_items)
        };
        tracing::trace!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            "set changed"
        );
        targets.emit(ChangeEvent::Set(diff));
    }
}

impl PartialEq for FacetSet {
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let a = self.inner.borrow();
        let b = other.inner.borrow();
        a.members.len() == b.members.len() && a.members.iter().all(|v| b.members.contains(v))
    }
}

impl fmt::Debug for FacetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f.debug_set().entries(inner.members.iter()).finish(),
            Err(_) => f.write_str("FacetSet(<borrowed>)"),
        }
    }
}
