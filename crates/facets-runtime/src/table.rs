#![forbid(unsafe_code)]

//! Subscription table: which listeners each subscription holds on which
//! object.
//!
//! # Invariants
//!
//! 1. At most one binding exists per `(object, subscription, node)`. It
//!    counts the references that reached it and is detached when the count
//!    drops to zero.
//! 2. The table never keeps an object alive: entries hold [`WeakObject`]s and
//!    entries of dead objects are pruned.
//! 3. Every notifier and facet-added hook a binding records is removed from
//!    its object exactly once, when the binding is taken out of the table.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use facets_core::{CollectionKind, HookId, NotifierId, Object, ObjectId, WeakObject};
use facets_path::NodeId;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Identity of one `observe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

/// Listener strategy used for one bound attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Simple,
    List,
    Dict,
    Set,
    /// Every attribute of the object (`-`).
    Wildcard,
}

impl BindingKind {
    /// Position in the runtime's strategy table.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Simple => 0,
            Self::List => 1,
            Self::Dict => 2,
            Self::Set => 3,
            Self::Wildcard => 4,
        }
    }
}

impl From<CollectionKind> for BindingKind {
    fn from(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::Simple => Self::Simple,
            CollectionKind::List => Self::List,
            CollectionKind::Dict => Self::Dict,
            CollectionKind::Set => Self::Set,
        }
    }
}

/// Listeners attached for one attribute.
#[derive(Debug, Clone)]
pub(crate) struct BoundAttr {
    pub(crate) name: Rc<str>,
    pub(crate) kind: BindingKind,
    pub(crate) notifiers: SmallVec<[NotifierId; 3]>,
    /// Downstream objects were registered through this attribute.
    pub(crate) linked: bool,
}

/// Everything one subscription attached to one object for one node.
#[derive(Debug)]
pub(crate) struct Binding {
    refs: u32,
    pub(crate) attrs: Vec<BoundAttr>,
    pub(crate) added_hook: Option<HookId>,
}

impl Binding {
    /// Remove every recorded listener from `object`.
    pub(crate) fn detach(&self, object: &Object) {
        for attr in &self.attrs {
            for id in &attr.notifiers {
                object.remove_notifier(*id);
            }
        }
        if let Some(hook) = self.added_hook {
            object.remove_facet_added(hook);
        }
    }
}

struct ObjectEntry {
    object: WeakObject,
    bindings: Vec<(SubscriptionId, NodeId, Binding)>,
}

impl ObjectEntry {
    fn find(&self, sub: SubscriptionId, node: NodeId) -> Option<usize> {
        self.bindings
            .iter()
            .position(|(s, n, _)| *s == sub && *n == node)
    }
}

/// Read-only view of one binding, for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub subscription: SubscriptionId,
    pub node: NodeId,
    pub attributes: Vec<(Rc<str>, BindingKind)>,
}

/// Bindings keyed by object identity.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: RefCell<FxHashMap<ObjectId, ObjectEntry>>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live `(object, subscription, node)` bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .map(|entry| entry.bindings.len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Number of objects with at least one binding.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Bindings held on `object`, in creation order.
    #[must_use]
    pub fn bindings_for(&self, object: ObjectId) -> Vec<BindingInfo> {
        let entries = self.entries.borrow();
        let Some(entry) = entries.get(&object) else {
            return Vec::new();
        };
        entry
            .bindings
            .iter()
            .map(|(sub, node, binding)| BindingInfo {
                subscription: *sub,
                node: *node,
                attributes: binding
                    .attrs
                    .iter()
                    .map(|attr| (Rc::clone(&attr.name), attr.kind))
                    .collect(),
            })
            .collect()
    }

    #[must_use]
    pub(crate) fn contains(&self, object: ObjectId, sub: SubscriptionId, node: NodeId) -> bool {
        self.entries
            .borrow()
            .get(&object)
            .is_some_and(|entry| entry.find(sub, node).is_some())
    }

    /// Open an empty binding, or add a reference to an existing one.
    /// Returns `true` only when the binding is new.
    pub(crate) fn open(&self, object: &Object, sub: SubscriptionId, node: NodeId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.entry(object.id()).or_insert_with(|| ObjectEntry {
            object: object.downgrade(),
            bindings: Vec::new(),
        });
        if let Some(index) = entry.find(sub, node) {
            entry.bindings[index].2.refs += 1;
            return false;
        }
        entry.bindings.push((
            sub,
            node,
            Binding {
                refs: 1,
                attrs: Vec::new(),
                added_hook: None,
            },
        ));
        true
    }

    /// Mark the downstream of attribute `name` as registered. Returns the
    /// previous mark, or `None` if there is no such binding.
    pub(crate) fn relink(
        &self,
        object: ObjectId,
        sub: SubscriptionId,
        node: NodeId,
        name: &str,
    ) -> Option<bool> {
        let mut previous = None;
        self.with_binding(object, sub, node, |binding| {
            if let Some(attr) = binding.attrs.iter_mut().find(|attr| &*attr.name == name) {
                previous = Some(std::mem::replace(&mut attr.linked, true));
            }
        });
        previous
    }

    /// Record an attached attribute. Returns `false` if the binding is gone.
    pub(crate) fn push_attr(
        &self,
        object: ObjectId,
        sub: SubscriptionId,
        node: NodeId,
        attr: BoundAttr,
    ) -> bool {
        self.with_binding(object, sub, node, |binding| binding.attrs.push(attr))
    }

    pub(crate) fn set_hook(
        &self,
        object: ObjectId,
        sub: SubscriptionId,
        node: NodeId,
        hook: HookId,
    ) -> bool {
        self.with_binding(object, sub, node, |binding| binding.added_hook = Some(hook))
    }

    fn with_binding(
        &self,
        object: ObjectId,
        sub: SubscriptionId,
        node: NodeId,
        f: impl FnOnce(&mut Binding),
    ) -> bool {
        let mut entries = self.entries.borrow_mut();
        let Some(entry) = entries.get_mut(&object) else {
            return false;
        };
        match entry.find(sub, node) {
            Some(index) => {
                f(&mut entry.bindings[index].2);
                true
            }
            None => false,
        }
    }

    /// Drop one reference to a binding. Returns the binding once its last
    /// reference is gone.
    pub(crate) fn release(&self, object: ObjectId, sub: SubscriptionId, node: NodeId) -> Option<Binding> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(&object)?;
        let index = entry.find(sub, node)?;
        let refs = &mut entry.bindings[index].2.refs;
        *refs = refs.saturating_sub(1);
        if *refs > 0 {
            return None;
        }
        let (_, _, binding) = entry.bindings.remove(index);
        if entry.bindings.is_empty() {
            entries.remove(&object);
        }
        Some(binding)
    }

    /// Names and kinds of the attributes on a binding that registered
    /// downstream objects. `None` if the binding does not exist.
    pub(crate) fn linked_attrs(
        &self,
        object: ObjectId,
        sub: SubscriptionId,
        node: NodeId,
    ) -> Option<SmallVec<[(Rc<str>, BindingKind); 2]>> {
        let entries = self.entries.borrow();
        let entry = entries.get(&object)?;
        let index = entry.find(sub, node)?;
        Some(
            entry.bindings[index]
                .2
                .attrs
                .iter()
                .filter(|attr| attr.linked)
                .map(|attr| (Rc::clone(&attr.name), attr.kind))
                .collect(),
        )
    }

    /// Keep the bindings of `sub` that appear in `reached`, with their
    /// reference count reset to the recorded one. Remove and return the
    /// rest.
    pub(crate) fn retain_reached(
        &self,
        sub: SubscriptionId,
        reached: &FxHashMap<(ObjectId, NodeId), u32>,
    ) -> Vec<(WeakObject, Binding)> {
        let mut dropped = Vec::new();
        let mut entries = self.entries.borrow_mut();
        entries.retain(|id, entry| {
            let mut kept = Vec::with_capacity(entry.bindings.len());
            for (s, node, mut binding) in entry.bindings.drain(..) {
                if s != sub {
                    kept.push((s, node, binding));
                    continue;
                }
                match reached.get(&(*id, node)) {
                    Some(&refs) => {
                        binding.refs = refs;
                        kept.push((s, node, binding));
                    }
                    None => dropped.push((entry.object.clone(), binding)),
                }
            }
            entry.bindings = kept;
            !entry.bindings.is_empty()
        });
        dropped
    }

    /// Remove and return every binding of `sub`, with its object handle.
    pub(crate) fn take_subscription(&self, sub: SubscriptionId) -> Vec<(WeakObject, Binding)> {
        let mut taken = Vec::new();
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, entry| {
            let (mine, rest): (Vec<_>, Vec<_>) =
                entry.bindings.drain(..).partition(|(s, _, _)| *s == sub);
            entry.bindings = rest;
            taken.extend(
                mine.into_iter()
                    .map(|(_, _, binding)| (entry.object.clone(), binding)),
            );
            !entry.bindings.is_empty()
        });
        taken
    }

    /// Drop entries whose object no longer exists. Returns how many.
    pub(crate) fn prune(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, entry| entry.object.is_alive());
        before - entries.len()
    }

    pub(crate) fn clear(&self) -> Vec<(WeakObject, Binding)> {
        let mut entries = self.entries.borrow_mut();
        entries
            .drain()
            .flat_map(|(_, entry)| {
                let object = entry.object;
                entry
                    .bindings
                    .into_iter()
                    .map(move |(_, _, binding)| (object.clone(), binding))
            })
            .collect()
    }
}

impl fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("objects", &self.object_count())
            .field("bindings", &self.len())
            .finish()
    }
}
