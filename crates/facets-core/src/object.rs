#![forbid(unsafe_code)]

//! Objects with named, declared attributes ("facets").
//!
//! # Design
//!
//! An [`Object`] is a shared handle (`Rc`) to a class name and an ordered
//! table of slots. Each slot holds a declaration, the current value and the
//! notifiers registered on that attribute. Objects compare and hash by
//! identity; [`ObjectId`]s are never reused within a process.
//!
//! Collection-kind attributes always hold a proxy ([`FacetList`],
//! [`FacetDict`], [`FacetSet`]) bound to `(object, attribute)`. Assigning a
//! new collection copies its contents into a fresh proxy; the previous proxy
//! is detached and stops reporting to this object.
//!
//! # Invariants
//!
//! 1. Assigning a scalar equal to the current value emits nothing.
//!    Assigning a collection attribute always emits.
//! 2. Notifiers run after every internal borrow is released, in
//!    registration order (priority notifiers first), attribute notifiers
//!    before any-attribute notifiers.
//! 3. A notifier removed while a notification is in flight is not invoked
//!    by that notification.
//!
//! # Failure Modes
//!
//! - **Missing attribute**: every name-based call returns
//!   [`FacetError::MissingAttribute`] instead of panicking.
//! - **Validation**: a rejected assignment leaves the old value in place and
//!   emits nothing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::collections::{
    CollectionKind, DictSpec, FacetDict, FacetList, FacetSet, ListSpec, SetSpec,
};
use crate::error::{FacetError, ValidationContext};
use crate::event::{Change, ChangeEvent};
use crate::validate::Validator;
use crate::value::Value;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by [`Object::add_notifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifierId(u64);

/// Handle returned by [`Object::on_facet_added`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Which events a notifier receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Assignments only.
    Whole,
    /// In-place collection changes only.
    Items,
    Both,
}

impl Channel {
    #[must_use]
    pub const fn accepts(self, event: &ChangeEvent) -> bool {
        match self {
            Self::Whole => !event.is_items(),
            Self::Items => event.is_items(),
            Self::Both => true,
        }
    }
}

/// Where to register a notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget<'a> {
    Attribute(&'a str),
    /// Every attribute of the object, including ones added later.
    AnyAttribute,
}

type NotifyFn = dyn Fn(&Change);
type AddedFn = dyn Fn(&Object, &str);

#[derive(Clone)]
struct Notifier {
    id: NotifierId,
    channel: Channel,
    alive: Rc<Cell<bool>>,
    callback: Rc<NotifyFn>,
}

#[derive(Clone)]
struct AddedHook {
    id: HookId,
    alive: Rc<Cell<bool>>,
    callback: Rc<AddedFn>,
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Storage shape and constraints of an attribute.
#[derive(Debug, Clone)]
pub enum FacetKind {
    Simple,
    List(ListSpec),
    Dict(DictSpec),
    Set(SetSpec),
}

impl FacetKind {
    #[must_use]
    pub const fn collection_kind(&self) -> CollectionKind {
        match self {
            Self::Simple => CollectionKind::Simple,
            Self::List(_) => CollectionKind::List,
            Self::Dict(_) => CollectionKind::Dict,
            Self::Set(_) => CollectionKind::Set,
        }
    }
}

/// Declaration of one attribute: kind, default, validator and metadata.
#[derive(Debug, Clone)]
pub struct FacetDecl {
    kind: FacetKind,
    default: Value,
    validator: Option<Validator>,
    metadata: IndexMap<Rc<str>, Value, FxBuildHasher>,
}

impl FacetDecl {
    fn with_kind(kind: FacetKind) -> Self {
        Self {
            kind,
            default: Value::None,
            validator: None,
            metadata: IndexMap::default(),
        }
    }

    /// A plain attribute starting at `default`.
    #[must_use]
    pub fn simple(default: impl Into<Value>) -> Self {
        let mut decl = Self::with_kind(FacetKind::Simple);
        decl.default = default.into();
        decl
    }

    /// A plain attribute starting at `None`.
    #[must_use]
    pub fn any() -> Self {
        Self::with_kind(FacetKind::Simple)
    }

    #[must_use]
    pub fn list(spec: ListSpec) -> Self {
        Self::with_kind(FacetKind::List(spec))
    }

    #[must_use]
    pub fn dict(spec: DictSpec) -> Self {
        Self::with_kind(FacetKind::Dict(spec))
    }

    #[must_use]
    pub fn set(spec: SetSpec) -> Self {
        Self::with_kind(FacetKind::Set(spec))
    }

    /// Initial value. For collection kinds, a collection whose contents seed
    /// the attribute.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Validator applied to every assignment.
    #[must_use]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn meta(mut self, key: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> &FacetKind {
        &self.kind
    }

    #[must_use]
    pub fn collection_kind(&self) -> CollectionKind {
        self.kind.collection_kind()
    }

    #[must_use]
    pub fn initial_value(&self) -> &Value {
        &self.default
    }

    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Whether `key` is present with a non-`None` value.
    #[must_use]
    pub fn has_metadata(&self, key: &str) -> bool {
        self.metadata.get(key).is_some_and(|v| !v.is_none())
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

struct Slot {
    decl: Rc<FacetDecl>,
    value: Value,
    notifiers: Vec<Notifier>,
}

#[derive(Default)]
struct ObjectState {
    slots: IndexMap<Rc<str>, Slot, FxBuildHasher>,
    any_notifiers: Vec<Notifier>,
    added_hooks: Vec<AddedHook>,
    next_handle: u64,
}

impl ObjectState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Live notifiers interested in `event` on `name`, in dispatch order.
    fn interested(&self, name: &str, event: &ChangeEvent) -> SmallVec<[Notifier; 4]> {
        let own = self.slots.get(name).map(|slot| slot.notifiers.as_slice());
        own.unwrap_or_default()
            .iter()
            .chain(&self.any_notifiers)
            .filter(|n| n.alive.get() && n.channel.accepts(event))
            .cloned()
            .collect()
    }
}

struct ObjectInner {
    id: ObjectId,
    class_name: Rc<str>,
    state: RefCell<ObjectState>,
}

/// Shared handle to an attribute-bearing object.
#[derive(Clone)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

/// Non-owning handle to an [`Object`].
#[derive(Clone)]
pub struct WeakObject {
    inner: Weak<ObjectInner>,
    id: ObjectId,
}

impl WeakObject {
    #[must_use]
    pub fn upgrade(&self) -> Option<Object> {
        self.inner.upgrade().map(|inner| Object { inner })
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObject")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Builder returned by [`Object::builder`].
#[derive(Debug)]
pub struct ObjectBuilder {
    class_name: Rc<str>,
    facets: Vec<(Rc<str>, FacetDecl)>,
}

impl ObjectBuilder {
    /// Declare an attribute. A repeated name replaces the earlier declaration.
    #[must_use]
    pub fn facet(mut self, name: impl Into<Rc<str>>, decl: FacetDecl) -> Self {
        let name = name.into();
        self.facets.retain(|(existing, _)| *existing != name);
        self.facets.push((name, decl));
        self
    }

    #[must_use]
    pub fn build(self) -> Object {
        let object = Object {
            inner: Rc::new(ObjectInner {
                id: ObjectId::next(),
                class_name: self.class_name,
                state: RefCell::new(ObjectState::default()),
            }),
        };
        let slots: IndexMap<Rc<str>, Slot, FxBuildHasher> = self
            .facets
            .into_iter()
            .map(|(name, decl)| {
                let value = object.seed(&name, &decl);
                let slot = Slot {
                    decl: Rc::new(decl),
                    value,
                    notifiers: Vec::new(),
                };
                (name, slot)
            })
            .collect();
        object.inner.state.borrow_mut().slots = slots;
        object
    }
}

impl Object {
    #[must_use]
    pub fn builder(class_name: impl Into<Rc<str>>) -> ObjectBuilder {
        ObjectBuilder {
            class_name: class_name.into(),
            facets: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            inner: Rc::downgrade(&self.inner),
            id: self.inner.id,
        }
    }

    fn missing(&self, name: &str) -> FacetError {
        FacetError::MissingAttribute {
            class: self.class_name().to_string(),
            name: name.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn has_facet(&self, name: &str) -> bool {
        self.inner.state.borrow().slots.contains_key(name)
    }

    #[must_use]
    pub fn facet_kind(&self, name: &str) -> Option<CollectionKind> {
        self.facet_decl(name).map(|decl| decl.collection_kind())
    }

    #[must_use]
    pub fn facet_decl(&self, name: &str) -> Option<Rc<FacetDecl>> {
        let state = self.inner.state.borrow();
        state.slots.get(name).map(|slot| Rc::clone(&slot.decl))
    }

    /// Attribute names in declaration order.
    #[must_use]
    pub fn facet_names(&self) -> Vec<Rc<str>> {
        self.inner.state.borrow().slots.keys().cloned().collect()
    }

    /// Attribute names starting with `prefix`, optionally filtered by
    /// metadata: `Some((key, true))` keeps attributes where `key` is defined,
    /// `Some((key, false))` keeps those where it is not.
    #[must_use]
    pub fn facet_names_matching(&self, prefix: &str, metadata: Option<(&str, bool)>) -> Vec<Rc<str>> {
        let state = self.inner.state.borrow();
        state
            .slots
            .iter()
            .filter(|(name, slot)| {
                name.starts_with(prefix)
                    && metadata.is_none_or(|(key, defined)| slot.decl.has_metadata(key) == defined)
            })
            .map(|(name, _)| Rc::clone(name))
            .collect()
    }

    /// Number of live notifiers, attribute-level and any-attribute.
    #[must_use]
    pub fn notifier_count(&self) -> usize {
        let state = self.inner.state.borrow();
        state
            .slots
            .values()
            .map(|slot| slot.notifiers.len())
            .sum::<usize>()
            + state.any_notifiers.len()
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Current value of `name`. Collection attributes return their live proxy.
    pub fn get(&self, name: &str) -> Result<Value, FacetError> {
        let state = self.inner.state.borrow();
        state
            .slots
            .get(name)
            .map(|slot| slot.value.clone())
            .ok_or_else(|| self.missing(name))
    }

    pub fn facet_list(&self, name: &str) -> Result<FacetList, FacetError> {
        match self.get(name)? {
            Value::List(list) => Ok(list),
            other => Err(mismatch(name, "list", &other)),
        }
    }

    pub fn facet_dict(&self, name: &str) -> Result<FacetDict, FacetError> {
        match self.get(name)? {
            Value::Dict(dict) => Ok(dict),
            other => Err(mismatch(name, "dict", &other)),
        }
    }

    pub fn facet_set(&self, name: &str) -> Result<FacetSet, FacetError> {
        match self.get(name)? {
            Value::Set(set) => Ok(set),
            other => Err(mismatch(name, "set", &other)),
        }
    }

    /// Assign `value` to `name` and notify.
    ///
    /// # Errors
    ///
    /// [`FacetError::MissingAttribute`], [`FacetError::Validation`],
    /// [`FacetError::TypeMismatch`] or [`FacetError::LengthConstraint`].
    /// On error the attribute keeps its previous value.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), FacetError> {
        let (key, decl) = {
            let state = self.inner.state.borrow();
            let (key, slot) = state
                .slots
                .get_key_value(name)
                .ok_or_else(|| self.missing(name))?;
            (Rc::clone(key), Rc::clone(&slot.decl))
        };
        let new = self.coerce(&key, &decl, value.into())?;

        let (old, notifiers, event) = {
            let mut state = self.inner.state.borrow_mut();
            let slot = state.slots.get_mut(&*key).ok_or_else(|| self.missing(name))?;
            if matches!(decl.kind, FacetKind::Simple) && slot.value == new {
                return Ok(());
            }
            let old = std::mem::replace(&mut slot.value, new.clone());
            let event = ChangeEvent::Scalar {
                old: old.clone(),
                new,
            };
            let notifiers = state.interested(&key, &event);
            (old, notifiers, event)
        };

        if !matches!(decl.kind, FacetKind::Simple) {
            detach(&old);
        }
        tracing::trace!(object = %self.id(), name = %key, "facet assigned");
        self.dispatch(notifiers, key, event);
        Ok(())
    }

    /// Assign several attributes in order, stopping at the first error.
    pub fn set_many<N, V>(&self, values: impl IntoIterator<Item = (N, V)>) -> Result<(), FacetError>
    where
        N: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in values {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Declare a new attribute on this object and run facet-added hooks.
    ///
    /// # Errors
    ///
    /// [`FacetError::DuplicateAttribute`] if `name` already exists.
    pub fn add_facet(&self, name: impl Into<Rc<str>>, decl: FacetDecl) -> Result<(), FacetError> {
        let name = name.into();
        if self.has_facet(&name) {
            return Err(FacetError::DuplicateAttribute {
                class: self.class_name().to_string(),
                name: name.to_string(),
            });
        }
        let value = self.seed(&name, &decl);
        let hooks: SmallVec<[AddedHook; 2]> = {
            let mut state = self.inner.state.borrow_mut();
            state.slots.insert(
                Rc::clone(&name),
                Slot {
                    decl: Rc::new(decl),
                    value,
                    notifiers: Vec::new(),
                },
            );
            state.added_hooks.iter().filter(|h| h.alive.get()).cloned().collect()
        };
        tracing::debug!(object = %self.id(), name = %name, hooks = hooks.len(), "facet added");
        for hook in hooks {
            if hook.alive.get() {
                (hook.callback)(self, &name);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notifiers
    // -----------------------------------------------------------------------

    /// Register `callback` for changes on `target`.
    ///
    /// Priority notifiers are placed ahead of existing ones.
    ///
    /// # Errors
    ///
    /// [`FacetError::MissingAttribute`] for an unknown attribute name.
    pub fn add_notifier(
        &self,
        target: NotifyTarget<'_>,
        channel: Channel,
        priority: bool,
        callback: impl Fn(&Change) + 'static,
    ) -> Result<NotifierId, FacetError> {
        let mut state = self.inner.state.borrow_mut();
        let notifier = Notifier {
            id: NotifierId(state.next_handle()),
            channel,
            alive: Rc::new(Cell::new(true)),
            callback: Rc::new(callback),
        };
        let id = notifier.id;
        let list = match target {
            NotifyTarget::Attribute(name) => {
                &mut state
                    .slots
                    .get_mut(name)
                    .ok_or_else(|| self.missing(name))?
                    .notifiers
            }
            NotifyTarget::AnyAttribute => &mut state.any_notifiers,
        };
        if priority {
            list.insert(0, notifier);
        } else {
            list.push(notifier);
        }
        Ok(id)
    }

    /// Remove a notifier. Returns whether it was registered.
    pub fn remove_notifier(&self, id: NotifierId) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let state = &mut *state;
        let lists = state
            .slots
            .values_mut()
            .map(|slot| &mut slot.notifiers)
            .chain(std::iter::once(&mut state.any_notifiers));
        for list in lists {
            if let Some(index) = list.iter().position(|n| n.id == id) {
                let notifier = list.remove(index);
                notifier.alive.set(false);
                return true;
            }
        }
        false
    }

    /// Run `callback(object, name)` whenever [`add_facet`](Self::add_facet)
    /// declares a new attribute.
    pub fn on_facet_added(&self, callback: impl Fn(&Object, &str) + 'static) -> HookId {
        let mut state = self.inner.state.borrow_mut();
        let id = HookId(state.next_handle());
        state.added_hooks.push(AddedHook {
            id,
            alive: Rc::new(Cell::new(true)),
            callback: Rc::new(callback),
        });
        id
    }

    pub fn remove_facet_added(&self, id: HookId) -> bool {
        let mut state = self.inner.state.borrow_mut();
        match state.added_hooks.iter().position(|h| h.id == id) {
            Some(index) => {
                state.added_hooks.remove(index).alive.set(false);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn facet_added_hook_count(&self) -> usize {
        self.inner.state.borrow().added_hooks.len()
    }

    /// Deliver an in-place collection change on `name`.
    pub(crate) fn items_changed(&self, name: &Rc<str>, event: ChangeEvent) {
        let notifiers = self.inner.state.borrow().interested(name, &event);
        if notifiers.is_empty() {
            return;
        }
        tracing::trace!(object = %self.id(), name = %name, "facet items changed");
        self.dispatch(notifiers, Rc::clone(name), event);
    }

    fn dispatch(&self, notifiers: SmallVec<[Notifier; 4]>, name: Rc<str>, event: ChangeEvent) {
        if notifiers.is_empty() {
            return;
        }
        let change = Change {
            object: self.clone(),
            name,
            event,
        };
        for notifier in notifiers {
            if notifier.alive.get() {
                (notifier.callback)(&change);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Slot values
    // -----------------------------------------------------------------------

    /// Initial slot value. Collection defaults are trusted.
    fn seed(&self, name: &Rc<str>, decl: &FacetDecl) -> Value {
        let value = match &decl.kind {
            FacetKind::Simple => return decl.default.clone(),
            FacetKind::List(spec) => {
                let items = decl.default.as_list().map(FacetList::to_vec).unwrap_or_default();
                Value::List(FacetList::seeded(spec.clone(), items))
            }
            FacetKind::Dict(spec) => {
                let entries: Vec<(Value, Value)> = decl
                    .default
                    .as_dict()
                    .map(|d| d.to_map().into_iter().collect())
                    .unwrap_or_default();
                Value::Dict(FacetDict::seeded(spec.clone(), entries))
            }
            FacetKind::Set(spec) => {
                let items = decl.default.as_set().map(FacetSet::to_vec).unwrap_or_default();
                Value::Set(FacetSet::seeded(spec.clone(), items))
            }
        };
        attach(&value, self.downgrade(), Rc::clone(name));
        value
    }

    /// Validate an assignment and, for collection kinds, build the new proxy.
    fn coerce(&self, name: &Rc<str>, decl: &FacetDecl, value: Value) -> Result<Value, FacetError> {
        let value = match &decl.validator {
            Some(validator) => validator.apply(ValidationContext::Attribute, name, &value)?,
            None => value,
        };
        let value = match &decl.kind {
            FacetKind::Simple => return Ok(value),
            FacetKind::List(spec) => {
                let items = match &value {
                    Value::List(list) => list.to_vec(),
                    Value::Set(set) => set.to_vec(),
                    Value::None => Vec::new(),
                    other => return Err(mismatch(name, "list", other)),
                };
                Value::List(FacetList::validated(spec.clone(), items, name)?)
            }
            FacetKind::Dict(spec) => {
                let entries: Vec<(Value, Value)> = match &value {
                    Value::Dict(dict) => dict.to_map().into_iter().collect(),
                    Value::None => Vec::new(),
                    other => return Err(mismatch(name, "dict", other)),
                };
                Value::Dict(FacetDict::validated(spec.clone(), entries, name)?)
            }
            FacetKind::Set(spec) => {
                let items = match &value {
                    Value::Set(set) => set.to_vec(),
                    Value::List(list) => list.to_vec(),
                    Value::None => Vec::new(),
                    other => return Err(mismatch(name, "set", other)),
                };
                Value::Set(FacetSet::validated(spec.clone(), items, name)?)
            }
        };
        attach(&value, self.downgrade(), Rc::clone(name));
        Ok(value)
    }
}

fn mismatch(name: &str, expected: &'static str, found: &Value) -> FacetError {
    FacetError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}

fn attach(value: &Value, owner: WeakObject, name: Rc<str>) {
    match value {
        Value::List(list) => list.attach(owner, name),
        Value::Dict(dict) => dict.attach(owner, name),
        Value::Set(set) => set.attach(owner, name),
        _ => {}
    }
}

fn detach(value: &Value) {
    match value {
        Value::List(list) => list.detach(),
        Value::Dict(dict) => dict.detach(),
        Value::Set(set) => set.detach(),
        _ => {}
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.inner.class_name)
            .field("id", &self.inner.id.0)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Object {
        Object::builder("Person")
            .facet("name", FacetDecl::simple("anon"))
            .facet("age", FacetDecl::simple(0).validator(Validator::int()))
            .facet(
                "tags",
                FacetDecl::list(ListSpec::new().item(Validator::string()))
                    .default_value(Value::list([Value::from("new")])),
            )
            .facet("max_width", FacetDecl::simple(10).meta("editable", true))
            .facet("max_height", FacetDecl::simple(10))
            .build()
    }

    fn record(object: &Object, target: NotifyTarget<'_>, channel: Channel) -> Rc<RefCell<Vec<Change>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        object
            .add_notifier(target, channel, false, move |change| {
                sink.borrow_mut().push(change.clone());
            })
            .unwrap();
        seen
    }

    #[test]
    fn set_notifies_on_change_only() {
        let p = person();
        let seen = record(&p, NotifyTarget::Attribute("name"), Channel::Whole);
        p.set("name", "ada").unwrap();
        p.set("name", "ada").unwrap();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].old_value(), Some(&Value::from("anon")));
        assert_eq!(seen[0].new_value(), Some(&Value::from("ada")));
    }

    #[test]
    fn rejected_assignment_keeps_value() {
        let p = person();
        let seen = record(&p, NotifyTarget::Attribute("age"), Channel::Both);
        assert!(matches!(
            p.set("age", "old"),
            Err(FacetError::Validation {
                context: ValidationContext::Attribute,
                ..
            })
        ));
        assert_eq!(p.get("age").unwrap(), Value::Int(0));
        assert!(seen.borrow().is_empty());
        assert!(matches!(p.set("nope", 1), Err(FacetError::MissingAttribute { .. })));
    }

    #[test]
    fn collection_items_reach_owner() {
        let p = person();
        let whole = record(&p, NotifyTarget::Attribute("tags"), Channel::Whole);
        let items = record(&p, NotifyTarget::Attribute("tags"), Channel::Items);
        p.facet_list("tags").unwrap().append(Value::from("x")).unwrap();
        assert!(whole.borrow().is_empty());
        assert_eq!(items.borrow().len(), 1);
        assert!(matches!(items.borrow()[0].event, ChangeEvent::Sequence(_)));
    }

    #[test]
    fn reassigned_collection_detaches_old_proxy() {
        let p = person();
        let old = p.facet_list("tags").unwrap();
        let whole = record(&p, NotifyTarget::Attribute("tags"), Channel::Whole);
        let items = record(&p, NotifyTarget::Attribute("tags"), Channel::Items);

        p.set("tags", Value::list([Value::from("new")])).unwrap();
        assert_eq!(whole.borrow().len(), 1, "collection assignment always fires");

        old.append(Value::from("stale")).unwrap();
        assert!(items.borrow().is_empty());

        p.facet_list("tags").unwrap().append(Value::from("fresh")).unwrap();
        assert_eq!(items.borrow().len(), 1);
    }

    #[test]
    fn collection_assignment_validates_elements() {
        let p = person();
        assert!(p.set("tags", Value::list([Value::Int(1)])).is_err());
        assert!(matches!(
            p.set("tags", 5),
            Err(FacetError::TypeMismatch { expected: "list", .. })
        ));
        assert_eq!(p.facet_list("tags").unwrap().to_vec(), vec![Value::from("new")]);
    }

    #[test]
    fn any_attribute_notifier_sees_everything() {
        let p = person();
        let seen = record(&p, NotifyTarget::AnyAttribute, Channel::Both);
        p.set_many([("name", Value::from("x")), ("age", Value::Int(3))]).unwrap();
        p.facet_list("tags").unwrap().clear().unwrap();
        let names: Vec<String> = seen.borrow().iter().map(|c| c.name.to_string()).collect();
        assert_eq!(names, ["name", "age", "tags"]);
    }

    #[test]
    fn removed_notifier_is_skipped_mid_dispatch() {
        let p = person();
        let second_id = Rc::new(Cell::new(None));
        let fired = Rc::new(Cell::new(0));
        {
            let p2 = p.clone();
            let second_id = Rc::clone(&second_id);
            p.add_notifier(NotifyTarget::Attribute("name"), Channel::Whole, false, move |_| {
                if let Some(id) = second_id.get() {
                    p2.remove_notifier(id);
                }
            })
            .unwrap();
        }
        let counter = Rc::clone(&fired);
        let id = p
            .add_notifier(NotifyTarget::Attribute("name"), Channel::Whole, false, move |_| {
                counter.set(counter.get() + 1);
            })
            .unwrap();
        second_id.set(Some(id));
        p.set("name", "z").unwrap();
        assert_eq!(fired.get(), 0);
        assert_eq!(p.notifier_count(), 1);
    }

    #[test]
    fn priority_notifier_runs_first() {
        let p = person();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (label, priority) in [("normal", false), ("first", true)] {
            let order = Rc::clone(&order);
            p.add_notifier(NotifyTarget::Attribute("age"), Channel::Whole, priority, move |_| {
                order.borrow_mut().push(label);
            })
            .unwrap();
        }
        p.set("age", 1).unwrap();
        assert_eq!(*order.borrow(), ["first", "normal"]);
    }

    #[test]
    fn add_facet_runs_hooks_and_rejects_duplicates() {
        let p = person();
        let added = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&added);
        let hook = p.on_facet_added(move |_, name| sink.borrow_mut().push(name.to_string()));
        p.add_facet("nickname", FacetDecl::simple("")).unwrap();
        assert!(matches!(
            p.add_facet("nickname", FacetDecl::any()),
            Err(FacetError::DuplicateAttribute { .. })
        ));
        assert!(p.remove_facet_added(hook));
        p.add_facet("motto", FacetDecl::any()).unwrap();
        assert_eq!(*added.borrow(), ["nickname"]);
    }

    #[test]
    fn metadata_queries() {
        let p = person();
        assert_eq!(
            p.facet_names_matching("max_", Some(("editable", true))),
            vec![Rc::<str>::from("max_width")]
        );
        assert_eq!(
            p.facet_names_matching("max_", Some(("editable", false))),
            vec![Rc::<str>::from("max_height")]
        );
        assert_eq!(p.facet_names_matching("", None).len(), 5);
    }

    #[test]
    fn identity_and_weak_handles() {
        let p = person();
        let weak = p.downgrade();
        assert_eq!(weak.upgrade(), Some(p.clone()));
        assert_eq!(weak.id(), p.id());
        drop(p);
        assert!(weak.upgrade().is_none());
    }
}
