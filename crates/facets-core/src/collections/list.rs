#![forbid(unsafe_code)]

//! Observable sequence.
//!
//! Every mutation is reduced to one splice `(index, removed, added)`. Common
//! leading and trailing items are trimmed off first, so replacing a slice
//! with mostly equal contents reports only the part that differs.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use super::{Link, Subscription};
use crate::error::{FacetError, ValidationContext};
use crate::event::{ChangeEvent, ListDiff};
use crate::object::WeakObject;
use crate::validate::{Validator, validate_opt};
use crate::value::Value;

/// Constraints for a [`FacetList`].
#[derive(Debug, Clone)]
pub struct ListSpec {
    item: Option<Validator>,
    min_len: usize,
    max_len: Option<usize>,
    has_items: bool,
}

impl Default for ListSpec {
    fn default() -> Self {
        Self {
            item: None,
            min_len: 0,
            max_len: None,
            has_items: true,
        }
    }
}

impl ListSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every element with `validator`.
    #[must_use]
    pub fn item(mut self, validator: Validator) -> Self {
        self.item = Some(validator);
        self
    }

    /// Allowed length range, inclusive on both ends.
    #[must_use]
    pub fn bounds(mut self, min_len: usize, max_len: usize) -> Self {
        self.min_len = min_len;
        self.max_len = Some(max_len);
        self
    }

    #[must_use]
    pub fn min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;
        self
    }

    #[must_use]
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Whether in-place mutations are reported to the owning object
    /// (default `true`).
    #[must_use]
    pub fn items(mut self, has_items: bool) -> Self {
        self.has_items = has_items;
        self
    }

    #[must_use]
    pub fn validator(&self) -> Option<&Validator> {
        self.item.as_ref()
    }

    #[must_use]
    pub fn length_range(&self) -> (usize, Option<usize>) {
        (self.min_len, self.max_len)
    }

    #[must_use]
    pub fn has_items(&self) -> bool {
        self.has_items
    }

    fn check_len(&self, attempted: usize) -> Result<(), FacetError> {
        let too_long = self.max_len.is_some_and(|max| attempted > max);
        if attempted < self.min_len || too_long {
            return Err(FacetError::LengthConstraint {
                attempted,
                min: self.min_len,
                max: self.max_len,
            });
        }
        Ok(())
    }
}

struct ListInner {
    items: Vec<Value>,
    spec: ListSpec,
    link: Link,
}

/// Shared, observable list of [`Value`]s.
///
/// Cloning a `FacetList` yields another handle to the same storage.
#[derive(Clone)]
pub struct FacetList {
    inner: Rc<RefCell<ListInner>>,
}

impl FacetList {
    /// An empty list.
    #[must_use]
    pub fn new(spec: ListSpec) -> Self {
        Self::from_parts(spec, Vec::new())
    }

    /// A list holding `items`, validated and bounds-checked against `spec`.
    ///
    /// # Errors
    ///
    /// [`FacetError::Validation`] or [`FacetError::LengthConstraint`].
    pub fn with_items(
        spec: ListSpec,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<Self, FacetError> {
        Self::validated(spec, items.into_iter().collect(), "")
    }

    pub(crate) fn unchecked(items: Vec<Value>) -> Self {
        Self::from_parts(ListSpec::default(), items)
    }

    /// Default contents; trusted, so neither validated nor bounds-checked.
    pub(crate) fn seeded(spec: ListSpec, items: Vec<Value>) -> Self {
        Self::from_parts(spec, items)
    }

    pub(crate) fn validated(
        spec: ListSpec,
        items: Vec<Value>,
        name: &str,
    ) -> Result<Self, FacetError> {
        let items = items
            .iter()
            .map(|v| validate_opt(spec.item.as_ref(), ValidationContext::Element, name, v))
            .collect::<Result<Vec<_>, _>>()?;
        spec.check_len(items.len())?;
        Ok(Self::from_parts(spec, items))
    }

    fn from_parts(spec: ListSpec, items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ListInner {
                items,
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
    pub fn spec(&self) -> ListSpec {
        self.inner.borrow().spec.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.borrow().items.get(index).cloned()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.borrow().items.clone()
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.inner.borrow().items.contains(value)
    }

    #[must_use]
    pub fn position(&self, value: &Value) -> Option<usize> {
        self.inner.borrow().items.iter().position(|v| v == value)
    }

    /// Borrow the items without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
        f(&self.inner.borrow().items)
    }

    /// Receive every diff of this list until the guard is dropped.
    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + 'static) -> Subscription {
        self.inner.borrow_mut().link.subscribe(callback)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().link.subscriber_count()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Replace the element at `index`.
    ///
    /// # Errors
    ///
    /// [`FacetError::IndexOutOfRange`] or [`FacetError::Validation`].
    pub fn set_item(&self, index: usize, value: Value) -> Result<(), FacetError> {
        self.check_index(index)?;
        self.splice(index..index + 1, vec![value], true)
    }

    /// Replace `range` (clamped to the current length) with `values`. A
    /// reversed range is empty and inserts at its start.
    pub fn set_slice(&self, range: Range<usize>, values: Vec<Value>) -> Result<(), FacetError> {
        self.splice(range, values, true)
    }

    pub fn delete(&self, index: usize) -> Result<(), FacetError> {
        self.check_index(index)?;
        self.splice(index..index + 1, Vec::new(), false)
    }

    pub fn delete_slice(&self, range: Range<usize>) -> Result<(), FacetError> {
        self.splice(range, Vec::new(), false)
    }

    /// Insert before `index`; an index past the end appends.
    pub fn insert(&self, index: usize, value: Value) -> Result<(), FacetError> {
        let index = index.min(self.len());
        self.splice(index..index, vec![value], true)
    }

    pub fn append(&self, value: Value) -> Result<(), FacetError> {
        let len = self.len();
        self.splice(len..len, vec![value], true)
    }

    pub fn extend(&self, values: impl IntoIterator<Item = Value>) -> Result<(), FacetError> {
        let len = self.len();
        self.splice(len..len, values.into_iter().collect(), true)
    }

    /// Remove the first element equal to `value`.
    ///
    /// # Errors
    ///
    /// [`FacetError::KeyNotFound`] if no element matches.
    pub fn remove(&self, value: &Value) -> Result<(), FacetError> {
        let index = self.position(value).ok_or_else(|| FacetError::KeyNotFound {
            key: format!("{value:?}"),
        })?;
        self.delete(index)
    }

    /// Remove and return the element at `index` (the last one for `None`).
    pub fn pop(&self, index: Option<usize>) -> Result<Value, FacetError> {
        let len = self.len();
        if len == 0 {
            return Err(FacetError::Empty { operation: "pop" });
        }
        let index = index.unwrap_or(len - 1);
        let value = self
            .get(index)
            .ok_or(FacetError::IndexOutOfRange { index, len })?;
        self.delete(index)?;
        Ok(value)
    }

    /// Stable sort by [`Value::total_cmp`].
    pub fn sort(&self) -> Result<(), FacetError> {
        self.sort_by(Value::total_cmp)
    }

    pub fn sort_by(
        &self,
        mut compare: impl FnMut(&Value, &Value) -> Ordering,
    ) -> Result<(), FacetError> {
        let mut items = self.to_vec();
        items.sort_by(|a, b| compare(a, b));
        self.splice(0..items.len(), items, false)
    }

    pub fn reverse(&self) -> Result<(), FacetError> {
        let mut items = self.to_vec();
        items.reverse();
        self.splice(0..items.len(), items, false)
    }

    pub fn clear(&self) -> Result<(), FacetError> {
        let len = self.len();
        self.splice(0..len, Vec::new(), false)
    }

    fn check_index(&self, index: usize) -> Result<(), FacetError> {
        let len = self.len();
        if index >= len {
            return Err(FacetError::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    /// The one commit path: validate, bounds-check, trim, splice, emit.
    fn splice(
        &self,
        range: Range<usize>,
        added: Vec<Value>,
        validate: bool,
    ) -> Result<(), FacetError> {
        let added = if validate {
            let (validator, name) = {
                let inner = self.inner.borrow();
                (inner.spec.item.clone(), inner.link.name().to_string())
            };
            added
                .iter()
                .map(|v| validate_opt(validator.as_ref(), ValidationContext::Element, &name, v))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            added
        };

        let (diff, targets) = {
            let mut inner = self.inner.borrow_mut();
            let len = inner.items.len();
            let start = range.start.min(len);
            let end = range.end.clamp(start, len);
            let new_len = len - (end - start) + added.len();
            if new_len != len {
                inner.spec.check_len(new_len)?;
            }

            let old = &inner.items[start..end];
            let prefix = old.iter().zip(&added).take_while(|(a, b)| a == b).count();
            let suffix = old[prefix..]
                .iter()
                .rev()
                .zip(added[prefix..].iter().rev())
                .take_while(|(a, b)| a == b)
                .count();
            let removed = old[prefix..old.len() - suffix].to_vec();
            let added = added[prefix..added.len() - suffix].to_vec();
            if removed.is_empty() && added.is_empty() {
                return Ok(());
            }

            let index = start + prefix;
            inner
                .items
                .splice(index..index + removed.len(), added.iter().cloned());
            let has_items = inner.spec.has_items;
            (
                ListDiff {
                    index,
                    removed,
                    added,
                },
                inner.link.targets(has_items),
            )
        };

        tracing::trace!(
            index = diff.index,
            removed = diff.removed.len(),
            added = diff.added.len(),
            "list changed"
        );
        targets.emit(ChangeEvent::Sequence(diff));
        Ok(())
    }
}

impl PartialEq for FacetList {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner) || self.inner.borrow().items == other.inner.borrow().items
    }
}

impl fmt::Debug for FacetList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f.debug_tuple("FacetList").field(&inner.items).finish(),
            Err(_) => f.write_str("FacetList(<borrowed>)"),
        }
    }
}
