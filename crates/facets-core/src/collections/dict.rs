#![forbid(unsafe_code)]

//! Observable mapping.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{Link, Subscription};
use crate::error::{FacetError, ValidationContext};
use crate::event::{ChangeEvent, DictDiff, ValueMap};
use crate::object::WeakObject;
use crate::validate::{Validator, validate_opt};
use crate::value::Value;

/// Constraints for a [`FacetDict`].
#[derive(Debug, Clone)]
pub struct DictSpec {
    key: Option<Validator>,
    value: Option<Validator>,
    has_items: bool,
}

impl Default for DictSpec {
    fn default() -> Self {
        Self {
            key: None,
            value: None,
            has_items: true,
        }
    }
}

impl DictSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, validator: Validator) -> Self {
        self.key = Some(validator);
        self
    }

    #[must_use]
    pub fn value(mut self, validator: Validator) -> Self {
        self.value = Some(validator);
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

    fn validate_entry(
        &self,
        name: &str,
        key: &Value,
        value: &Value,
    ) -> Result<(Value, Value), FacetError> {
        Ok((
            validate_opt(self.key.as_ref(), ValidationContext::Key, name, key)?,
            validate_opt(self.value.as_ref(), ValidationContext::Value, name, value)?,
        ))
    }
}

struct DictInner {
    entries: ValueMap,
    spec: DictSpec,
    link: Link,
}

/// Shared, observable, insertion-ordered map.
#[derive(Clone)]
pub struct FacetDict {
    inner: Rc<RefCell<DictInner>>,
}

impl FacetDict {
    #[must_use]
    pub fn new(spec: DictSpec) -> Self {
        Self::from_parts(spec, ValueMap::default())
    }

    /// A dict holding `entries`, validated against `spec`.
    pub fn with_entries(
        spec: DictSpec,
        entries: impl IntoIterator<Item = (Value, Value)>,
    ) -> Result<Self, FacetError> {
        Self::validated(spec, entries.into_iter().collect(), "")
    }

    pub(crate) fn unchecked(entries: Vec<(Value, Value)>) -> Self {
        Self::from_parts(DictSpec::default(), entries.into_iter().collect())
    }

    pub(crate) fn seeded(spec: DictSpec, entries: Vec<(Value, Value)>) -> Self {
        Self::from_parts(spec, entries.into_iter().collect())
    }

    pub(crate) fn validated(
        spec: DictSpec,
        entries: Vec<(Value, Value)>,
        name: &str,
    ) -> Result<Self, FacetError> {
        let entries = entries
            .iter()
            .map(|(k, v)| spec.validate_entry(name, k, v))
            .collect::<Result<ValueMap, _>>()?;
        Ok(Self::from_parts(spec, entries))
    }

    fn from_parts(spec: DictSpec, entries: ValueMap) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DictInner {
                entries,
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
        self.inner.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.inner.borrow().entries.get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &Value) -> bool {
        self.inner.borrow().entries.contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.inner.borrow().entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.inner.borrow().entries.values().cloned().collect()
    }

    #[must_use]
    pub fn to_map(&self) -> ValueMap {
        self.inner.borrow().entries.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&ValueMap) -> R) -> R {
        f(&self.inner.borrow().entries)
    }

    pub fn subscribe(&self, callback: impl Fn(&ChangeEvent) + 'static) -> Subscription {
        self.inner.borrow_mut().link.subscribe(callback)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert or replace, returning the previous value.
    pub fn insert(&self, key: Value, value: Value) -> Result<Option<Value>, FacetError> {
        let (key, value) = self.validate(&key, &value)?;
        let mut diff = DictDiff::default();
        let old = self.commit(|entries| {
            let old = entries.insert(key.clone(), value.clone());
            match &old {
                None => {
                    diff.added.insert(key, value);
                }
                Some(prev) if *prev != value => {
                    diff.changed.insert(key, prev.clone());
                }
                Some(_) => {}
            }
            old
        });
        self.emit(diff);
        Ok(old)
    }

    /// Remove `key`, returning its value.
    ///
    /// # Errors
    ///
    /// [`FacetError::KeyNotFound`] if absent.
    pub fn remove(&self, key: &Value) -> Result<Value, FacetError> {
        let mut diff = DictDiff::default();
        let removed = self.commit(|entries| {
            let (key, value) = entries.shift_remove_entry(key)?;
            diff.removed.insert(key, value.clone());
            Some(value)
        });
        self.emit(diff);
        removed.ok_or_else(|| FacetError::KeyNotFound {
            key: format!("{key:?}"),
        })
    }

    /// Same as [`remove`](Self::remove).
    pub fn pop(&self, key: &Value) -> Result<Value, FacetError> {
        self.remove(key)
    }

    /// Remove `key` if present, otherwise return `default` without an event.
    pub fn pop_or(&self, key: &Value, default: Value) -> Value {
        self.remove(key).unwrap_or(default)
    }

    /// Remove and return the most recently inserted entry.
    pub fn popitem(&self) -> Result<(Value, Value), FacetError> {
        let mut diff = DictDiff::default();
        let popped = self.commit(|entries| {
            let (key, value) = entries.pop()?;
            diff.removed.insert(key.clone(), value.clone());
            Some((key, value))
        });
        self.emit(diff);
        popped.ok_or(FacetError::Empty {
            operation: "popitem",
        })
    }

    pub fn clear(&self) {
        let mut diff = DictDiff::default();
        self.commit(|entries| diff.removed = std::mem::take(entries));
        self.emit(diff);
    }

    /// Return the value at `key`, inserting `default` first if absent.
    pub fn setdefault(&self, key: Value, default: Value) -> Result<Value, FacetError> {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let (key, value) = self.validate(&key, &default)?;
        let mut diff = DictDiff::default();
        self.commit(|entries| {
            entries.insert(key.clone(), value.clone());
            diff.added.insert(key, value.clone());
        });
        self.emit(diff);
        Ok(value)
    }

    /// Merge `entries` in order.
    ///
    /// Every supplied key lands in `added` (new) or `changed` (existing, old
    /// value recorded). Nothing is emitted when no value actually changed.
    /// All entries are validated before any is committed.
    pub fn update(
        &self,
        entries: impl IntoIterator<Item = (Value, Value)>,
    ) -> Result<(), FacetError> {
        let entries = entries
            .into_iter()
            .map(|(k, v)| self.validate(&k, &v))
            .collect::<Result<Vec<_>, _>>()?;
        let mut diff = DictDiff::default();
        let mut any_change = false;
        self.commit(|current| {
            for (key, value) in entries {
                match current.insert(key.clone(), value.clone()) {
                    None => {
                        any_change = true;
                        if !diff.changed.contains_key(&key) {
                            diff.added.insert(key, value);
                        }
                    }
                    Some(old) => {
                        any_change |= old != value;
                        if let Some(added) = diff.added.get_mut(&key) {
                            *added = value;
                        } else if !diff.changed.contains_key(&key) {
                            diff.changed.insert(key, old);
                        }
                    }
                }
            }
        });
        if any_change {
            self.emit(diff);
        }
        Ok(())
    }

    fn validate(&self, key: &Value, value: &Value) -> Result<(Value, Value), FacetError> {
        let (spec, name) = {
            let inner = self.inner.borrow();
            (inner.spec.clone(), inner.link.name().to_string())
        };
        spec.validate_entry(&name, key, value)
    }

    fn commit<R>(&self, f: impl FnOnce(&mut ValueMap) -> R) -> R {
        f(&mut self.inner.borrow_mut().entries)
    }

    fn emit(&self, diff: DictDiff) {
        if diff.is_empty() {
            return;
        }
        let targets = {
            let mut inner = self.inner.borrow_mut();
            let has_items = inner.spec.has_items;
            inner.link.targets(has_items)
        };
        tracing::trace!(
            added = diff.added.len(),
            changed = diff.changed.len(),
            removed = diff.removed.len(),
            "dict changed"
        );
        targets.emit(ChangeEvent::Map(diff));
    }
}

impl PartialEq for FacetDict {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
            || self.inner.borrow().entries == other.inner.borrow().entries
    }
}

impl fmt::Debug for FacetDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_tuple("FacetDict")
                .field(&inner.entries)
                .finish(),
            Err(_) => f.write_str("FacetDict(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    fn recording(dict: &FacetDict) -> (Rc<RefCell<Vec<DictDiff>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = dict.subscribe(move |event| {
            if let ChangeEvent::Map(diff) = event {
                sink.borrow_mut().push(diff.clone());
            }
        });
        (seen, sub)
    }

    #[test]
    fn insert_classifies_added_and_changed() {
        let dict = FacetDict::new(DictSpec::new());
        let (seen, _sub) = recording(&dict);
        assert_eq!(dict.insert(s("a"), Value::Int(1)).unwrap(), None);
        assert_eq!(dict.insert(s("a"), Value::Int(2)).unwrap(), Some(Value::Int(1)));
        dict.insert(s("a"), Value::Int(2)).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].added.get(&s("a")), Some(&Value::Int(1)));
        assert_eq!(seen[1].changed.get(&s("a")), Some(&Value::Int(1)));
    }

    #[test]
    fn update_partitions_keys() {
        let dict = FacetDict::with_entries(DictSpec::new(), [(s("a"), Value::Int(1))]).unwrap();
        let (seen, _sub) = recording(&dict);
        dict.update([(s("a"), Value::Int(1)), (s("b"), Value::Int(2))])
            .unwrap();
        let diff = &seen.borrow()[0];
        assert_eq!(diff.added.keys().collect::<Vec<_>>(), vec![&s("b")]);
        assert_eq!(diff.changed.keys().collect::<Vec<_>>(), vec![&s("a")]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn update_with_repeated_new_key_reports_committed_value() {
        let dict = FacetDict::new(DictSpec::new());
        let (seen, _sub) = recording(&dict);
        dict.update([(s("k"), Value::Int(1)), (s("k"), Value::Int(2))])
            .unwrap();
        assert_eq!(dict.get(&s("k")), Some(Value::Int(2)));
        let diff = &seen.borrow()[0];
        assert_eq!(diff.added.get(&s("k")), Some(&Value::Int(2)));
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn update_without_change_is_silent() {
        let dict = FacetDict::with_entries(DictSpec::new(), [(s("a"), Value::Int(1))]).unwrap();
        let (seen, _sub) = recording(&dict);
        dict.update([(s("a"), Value::Int(1))]).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn key_validation_is_tagged() {
        let dict = FacetDict::new(DictSpec::new().key(Validator::string()));
        let err = dict.insert(Value::Int(1), Value::Int(1)).unwrap_err();
        assert!(matches!(
            err,
            FacetError::Validation {
                context: ValidationContext::Key,
                ..
            }
        ));
        let dict = FacetDict::new(DictSpec::new().value(Validator::int()));
        let err = dict
            .update([(s("ok"), Value::Int(1)), (s("bad"), s("x"))])
            .unwrap_err();
        assert!(matches!(
            err,
            FacetError::Validation {
                context: ValidationContext::Value,
                ..
            }
        ));
        assert!(dict.is_empty());
    }

    #[test]
    fn setdefault_emits_once() {
        let dict = FacetDict::new(DictSpec::new());
        let (seen, _sub) = recording(&dict);
        assert_eq!(dict.setdefault(s("k"), Value::Int(5)).unwrap(), Value::Int(5));
        assert_eq!(dict.setdefault(s("k"), Value::Int(6)).unwrap(), Value::Int(5));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn removal_paths() {
        let dict = FacetDict::with_entries(
            DictSpec::new(),
            [(s("a"), Value::Int(1)), (s("b"), Value::Int(2))],
        )
        .unwrap();
        let (seen, _sub) = recording(&dict);
        assert_eq!(dict.popitem().unwrap(), (s("b"), Value::Int(2)));
        assert_eq!(dict.pop_or(&s("zz"), Value::None), Value::None);
        assert!(matches!(dict.pop(&s("zz")), Err(FacetError::KeyNotFound { .. })));
        dict.clear();
        dict.clear();
        assert!(matches!(dict.popitem(), Err(FacetError::Empty { .. })));
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].removed.get(&s("a")), Some(&Value::Int(1)));
    }
}
