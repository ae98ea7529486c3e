#![forbid(unsafe_code)]

//! Realizing a parsed pattern as listeners on live objects.
//!
//! Registration walks the syntax tree from the root object. For every
//! segment it opens a binding in the [`SubscriptionTable`], attaches the
//! listeners chosen by the attribute's [`BindingKind`], and continues into
//! the objects the attribute currently holds.
//!
//! Intermediate segments carry a *relay*: when the attribute changes, the
//! downstream chain is detached from the values that left and attached to
//! the values that arrived.
//!
//! # Invariants
//!
//! 1. A `(object, node)` pair is bound at most once per subscription. A
//!    second visit, through a cycle or a shared object, adds a reference to
//!    the existing binding and goes no further.
//! 2. Notifier closures hold only weak references to the subscription, so
//!    objects never keep a subscription alive.
//! 3. Unbinding removes exactly the listeners the table recorded.
//!
//! # Failure Modes
//!
//! - Errors during `observe` abort the pass; the caller rolls the whole
//!   subscription back.
//! - Errors while a relay attaches newly assigned objects cannot be returned
//!   to anyone. They are logged at `warn` and that branch stays unbound.
//!
//! Reference counts alone cannot free a cycle of objects that keep each
//! other bound. For repeating patterns, a relay that removed anything
//! re-marks what the root still reaches and detaches the rest.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use facets_core::{
    Change, ChangeEvent, Channel, NotifierId, NotifyTarget, Object, ObjectId, Value, WeakObject,
};
use facets_path::{NodeId, Segment, SyntaxNode, SyntaxTree};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::dispatch::{Dispatcher, Handler, ReentryGuard};
use crate::error::ObserveError;
use crate::table::{BindingKind, BoundAttr, SubscriptionId, SubscriptionTable};

/// Live state of one `observe` call.
pub(crate) struct SubscriptionState {
    pub(crate) id: SubscriptionId,
    pub(crate) tree: Arc<SyntaxTree>,
    pub(crate) handler: Handler,
    pub(crate) dispatch: Rc<str>,
    /// `None` runs handlers synchronously.
    pub(crate) dispatcher: Option<Rc<dyn Dispatcher>>,
    pub(crate) notify: bool,
    pub(crate) priority: bool,
    pub(crate) trace: bool,
    pub(crate) root: WeakObject,
    pub(crate) table: Rc<SubscriptionTable>,
    pub(crate) active: Cell<bool>,
    pub(crate) depth: Rc<Cell<u32>>,
}

impl SubscriptionState {
    fn incompatible(&self, reason: String) -> ObserveError {
        ObserveError::SignatureIncompatible {
            pattern: self.tree.source().to_string(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy table
// ---------------------------------------------------------------------------

type AttachFn = fn(
    &Rc<SubscriptionState>,
    &Object,
    &Rc<str>,
    NodeId,
    &Segment,
) -> Result<SmallVec<[NotifierId; 3]>, ObserveError>;

/// Objects the downstream chain continues into from an attribute value.
type TargetsFn = fn(&Value) -> Vec<Object>;

struct Strategy {
    attach: AttachFn,
    targets: TargetsFn,
}

/// Indexed by [`BindingKind::index`].
const STRATEGIES: [Strategy; 5] = [
    Strategy {
        attach: attach_simple,
        targets: simple_targets,
    },
    Strategy {
        attach: attach_collection,
        targets: list_targets,
    },
    Strategy {
        attach: attach_collection,
        targets: dict_targets,
    },
    Strategy {
        attach: attach_collection,
        targets: set_targets,
    },
    Strategy {
        attach: attach_wildcard,
        targets: no_targets,
    },
];

fn strategy(kind: BindingKind) -> &'static Strategy {
    &STRATEGIES[kind.index()]
}

fn objects(values: impl IntoIterator<Item = Value>) -> Vec<Object> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(object) => Some(object),
            _ => None,
        })
        .collect()
}

fn simple_targets(value: &Value) -> Vec<Object> {
    value.as_object().cloned().into_iter().collect()
}

fn list_targets(value: &Value) -> Vec<Object> {
    value.as_list().map(|list| objects(list.to_vec())).unwrap_or_default()
}

fn dict_targets(value: &Value) -> Vec<Object> {
    value.as_dict().map(|dict| objects(dict.values())).unwrap_or_default()
}

fn set_targets(value: &Value) -> Vec<Object> {
    value.as_set().map(|set| objects(set.to_vec())).unwrap_or_default()
}

fn no_targets(_: &Value) -> Vec<Object> {
    Vec::new()
}

fn add(
    state: &SubscriptionState,
    object: &Object,
    target: NotifyTarget<'_>,
    channel: Channel,
    callback: impl Fn(&Change) + 'static,
) -> Result<NotifierId, ObserveError> {
    Ok(object.add_notifier(target, channel, state.priority, callback)?)
}

fn attach_simple(
    state: &Rc<SubscriptionState>,
    object: &Object,
    name: &Rc<str>,
    node: NodeId,
    segment: &Segment,
) -> Result<SmallVec<[NotifierId; 3]>, ObserveError> {
    let mut ids = SmallVec::new();
    let target = NotifyTarget::Attribute(&**name);
    let Some(next) = segment.next() else {
        ids.push(add(state, object, target, Channel::Whole, handler_notifier(state, false))?);
        return Ok(ids);
    };

    let notify = state.notify && segment.notifies();
    let destination = notify && state.handler.is_value_only();
    if destination {
        if state.dispatcher.is_some() {
            return Err(state.incompatible(format!(
                "dispatch '{}' cannot deliver destination values through intermediate '{name}'",
                state.dispatch
            )));
        }
        if !state.tree.is_single_destination(next) {
            return Err(state.incompatible(format!(
                "value handler needs a single destination after intermediate '{name}'"
            )));
        }
    } else if notify {
        ids.push(add(state, object, target, Channel::Whole, handler_notifier(state, false))?);
    }
    ids.push(add(
        state,
        object,
        target,
        Channel::Whole,
        relay(state, node, next, simple_targets, destination),
    )?);
    Ok(ids)
}

fn attach_collection(
    state: &Rc<SubscriptionState>,
    object: &Object,
    name: &Rc<str>,
    node: NodeId,
    segment: &Segment,
) -> Result<SmallVec<[NotifierId; 3]>, ObserveError> {
    let mut ids = SmallVec::new();
    let target = NotifyTarget::Attribute(&**name);
    let items = segment.wants_items();
    let channel = if items || matches!(state.handler, Handler::Notify(_)) {
        Channel::Both
    } else {
        Channel::Whole
    };
    let Some(next) = segment.next() else {
        ids.push(add(state, object, target, channel, handler_notifier(state, items))?);
        return Ok(ids);
    };

    if state.notify && segment.notifies() {
        if state.handler.is_value_only() {
            return Err(state.incompatible(format!(
                "value handler cannot observe changes to intermediate collection '{name}'"
            )));
        }
        ids.push(add(state, object, target, channel, handler_notifier(state, items))?);
    }
    let targets: TargetsFn = match object.facet_kind(name).map(BindingKind::from) {
        Some(BindingKind::Dict) => dict_targets,
        Some(BindingKind::Set) => set_targets,
        _ => list_targets,
    };
    ids.push(add(
        state,
        object,
        target,
        Channel::Both,
        relay(state, node, next, targets, false),
    )?);
    Ok(ids)
}

fn attach_wildcard(
    state: &Rc<SubscriptionState>,
    object: &Object,
    _name: &Rc<str>,
    _node: NodeId,
    segment: &Segment,
) -> Result<SmallVec<[NotifierId; 3]>, ObserveError> {
    let mut ids = SmallVec::new();
    ids.push(add(
        state,
        object,
        NotifyTarget::AnyAttribute,
        Channel::Both,
        handler_notifier(state, segment.wants_items()),
    )?);
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Notifier closures
// ---------------------------------------------------------------------------

/// Value handed to a value-only handler for `change`.
///
/// Assignments pass the new value. Items events pass the added items when
/// the segment asked for them, and the attribute's current value otherwise.
fn payload(change: &Change, items: bool) -> Value {
    match &change.event {
        ChangeEvent::Scalar { new, .. } => new.clone(),
        event if items => {
            let current = change.object.facet_dict(&change.name).ok().map(|d| d.to_map());
            Value::list(event.added_values(current.as_ref()))
        }
        _ => change.object.get(&change.name).unwrap_or_default(),
    }
}

fn handler_notifier(state: &Rc<SubscriptionState>, items: bool) -> impl Fn(&Change) + 'static {
    let weak = Rc::downgrade(state);
    move |change| {
        if let Some(state) = weak.upgrade() {
            deliver(&state, change, payload(change, items));
        }
    }
}

fn relay(
    state: &Rc<SubscriptionState>,
    node: NodeId,
    next: NodeId,
    targets: TargetsFn,
    destination: bool,
) -> impl Fn(&Change) + 'static {
    let weak = Rc::downgrade(state);
    move |change| {
        let Some(state) = weak.upgrade() else {
            return;
        };
        if !state.active.get() {
            return;
        }
        let Some(linked) = state
            .table
            .relink(change.object.id(), state.id, node, &change.name)
        else {
            return;
        };
        let (removed, added) = match &change.event {
            // A deferred attribute has nothing downstream yet; bind all of it.
            _ if !linked => {
                let current = change.object.get(&change.name).unwrap_or_default();
                (Vec::new(), targets(&current))
            }
            ChangeEvent::Scalar { old, new } => (targets(old), targets(new)),
            event => {
                let current = change.object.facet_dict(&change.name).ok().map(|d| d.to_map());
                (
                    objects(event.removed_values()),
                    objects(event.added_values(current.as_ref())),
                )
            }
        };
        tracing::debug!(
            subscription = %state.id,
            object = %change.object.id(),
            name = %change.name,
            removed = removed.len(),
            added = added.len(),
            "relay rebinding downstream"
        );
        for object in &removed {
            unbind(&state, object, next);
        }
        let mut binder = Binder::new(&state, false);
        for object in &added {
            if let Err(err) = binder.register(object, next) {
                tracing::warn!(
                    subscription = %state.id,
                    object = %object.id(),
                    error = %err,
                    "could not bind newly assigned object"
                );
            }
        }
        if !removed.is_empty() && state.tree.has_cycle() {
            let swept = sweep_unreachable(&state);
            if swept > 0 {
                tracing::debug!(subscription = %state.id, swept, "detached bindings cut off from the root");
            }
        }
        if destination {
            if let ChangeEvent::Scalar { new, .. } = &change.event {
                let value = resolve(&state.tree, new, next);
                deliver(&state, change, value);
            }
        }
    }
}

/// Follow a single-destination chain from `value` and read its final value.
fn resolve(tree: &SyntaxTree, value: &Value, mut node: NodeId) -> Value {
    let mut value = value.clone();
    while let Some(segment) = tree.segment(node) {
        let Some(object) = value.as_object() else {
            return Value::None;
        };
        value = object.get(segment.name()).unwrap_or_default();
        match segment.next() {
            Some(next) => node = next,
            None => break,
        }
    }
    value
}

/// Hand a notification to the subscription's handler under its dispatch
/// policy.
pub(crate) fn deliver(state: &Rc<SubscriptionState>, change: &Change, value: Value) {
    if !state.active.get() {
        return;
    }
    if state.depth.get() > 0 {
        tracing::trace!(
            subscription = %state.id,
            name = %change.name,
            "reentrant notification skipped"
        );
        return;
    }
    match &state.dispatcher {
        None => invoke(state, change, &value),
        Some(dispatcher) => {
            let weak = Rc::downgrade(state);
            let change = change.clone();
            dispatcher.schedule(Box::new(move || {
                match weak.upgrade() {
                    Some(state) if state.active.get() => invoke(&state, &change, &value),
                    _ => tracing::trace!(name = %change.name, "dropped invocation of inactive subscription"),
                }
            }));
        }
    }
}

fn invoke(state: &SubscriptionState, change: &Change, value: &Value) {
    let _guard = ReentryGuard::enter(&state.depth);
    if state.trace {
        tracing::debug!(
            subscription = %state.id,
            object = %change.object.id(),
            name = %change.name,
            handler = state.handler.shape(),
            "notify"
        );
    }
    state.handler.call(change, value);
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// One registration pass.
pub(crate) struct Binder<'s> {
    state: &'s Rc<SubscriptionState>,
    visited: FxHashSet<(ObjectId, NodeId)>,
    /// The pass started by `observe` itself, as opposed to a relay.
    initial: bool,
}

impl<'s> Binder<'s> {
    pub(crate) fn new(state: &'s Rc<SubscriptionState>, initial: bool) -> Self {
        Self {
            state,
            visited: FxHashSet::default(),
            initial,
        }
    }

    pub(crate) fn register(&mut self, object: &Object, node: NodeId) -> Result<(), ObserveError> {
        if !self.visited.insert((object.id(), node)) {
            self.retain(object, node);
            return Ok(());
        }
        let tree = Arc::clone(&self.state.tree);
        match tree.node(node) {
            SyntaxNode::Group(items) => {
                for item in items {
                    self.register(object, *item)?;
                }
                Ok(())
            }
            SyntaxNode::Segment(segment) => self.register_segment(object, node, segment),
        }
    }

    /// Count another reference to bindings this pass already made.
    fn retain(&self, object: &Object, node: NodeId) {
        match self.state.tree.node(node) {
            SyntaxNode::Group(items) => {
                for item in items {
                    self.retain(object, *item);
                }
            }
            SyntaxNode::Segment(_) => {
                self.state.table.open(object, self.state.id, node);
            }
        }
    }

    fn register_segment(
        &mut self,
        object: &Object,
        node: NodeId,
        segment: &Segment,
    ) -> Result<(), ObserveError> {
        let state = self.state;
        if !state.table.open(object, state.id, node) {
            tracing::trace!(subscription = %state.id, object = %object.id(), %node, "already bound");
            return Ok(());
        }

        if segment.is_any_attribute() {
            let name: Rc<str> = Rc::from("-");
            let notifiers = (strategy(BindingKind::Wildcard).attach)(state, object, &name, node, segment)?;
            state.table.push_attr(
                object.id(),
                state.id,
                node,
                BoundAttr {
                    name,
                    kind: BindingKind::Wildcard,
                    notifiers,
                    linked: false,
                },
            );
            return Ok(());
        }

        let names = if segment.is_simple() {
            if object.has_facet(segment.name()) {
                vec![Rc::from(segment.name())]
            } else if segment.is_optional() {
                tracing::debug!(
                    subscription = %state.id,
                    object = %object.id(),
                    name = segment.name(),
                    "optional attribute absent"
                );
                Vec::new()
            } else {
                return Err(ObserveError::MissingAttribute {
                    class: object.class_name().to_string(),
                    name: segment.name().to_string(),
                });
            }
        } else {
            let filter = segment.metadata().map(|m| (m.name.as_str(), m.defined));
            let names = object.facet_names_matching(segment.name(), filter);
            let hook = object.on_facet_added(facet_added(state, node));
            state.table.set_hook(object.id(), state.id, node, hook);
            names
        };

        for name in names {
            self.attach_attribute(object, node, segment, name)?;
        }
        Ok(())
    }

    /// Attach listeners for one attribute and continue downstream.
    pub(crate) fn attach_attribute(
        &mut self,
        object: &Object,
        node: NodeId,
        segment: &Segment,
        name: Rc<str>,
    ) -> Result<(), ObserveError> {
        let state = self.state;
        let kind = object
            .facet_kind(&name)
            .map(BindingKind::from)
            .ok_or_else(|| ObserveError::MissingAttribute {
                class: object.class_name().to_string(),
                name: name.to_string(),
            })?;
        let strategy = strategy(kind);
        let notifiers = (strategy.attach)(state, object, &name, node, segment)?;
        let deferred = self.initial && segment.is_deferred();
        tracing::debug!(
            subscription = %state.id,
            object = %object.id(),
            name = %name,
            kind = ?kind,
            "attribute bound"
        );
        state.table.push_attr(
            object.id(),
            state.id,
            node,
            BoundAttr {
                name: Rc::clone(&name),
                kind,
                notifiers,
                linked: segment.next().is_some() && !deferred,
            },
        );

        let Some(next) = segment.next() else {
            return Ok(());
        };
        if deferred {
            tracing::trace!(subscription = %state.id, name = %name, "downstream deferred");
            return Ok(());
        }
        let value = object.get(&name)?;
        for target in (strategy.targets)(&value) {
            self.register(&target, next)?;
        }
        Ok(())
    }
}

/// Hook binding attributes declared after registration that match a
/// prefix or metadata segment.
fn facet_added(state: &Rc<SubscriptionState>, node: NodeId) -> impl Fn(&Object, &str) + 'static {
    let weak = Rc::downgrade(state);
    move |object, name| {
        let Some(state) = weak.upgrade() else {
            return;
        };
        if !state.active.get() || !state.table.contains(object.id(), state.id, node) {
            return;
        }
        let tree = Arc::clone(&state.tree);
        let Some(segment) = tree.segment(node) else {
            return;
        };
        if !segment.matches_name(name) {
            return;
        }
        if let Some(filter) = segment.metadata() {
            let defined = object
                .facet_decl(name)
                .is_some_and(|decl| decl.has_metadata(&filter.name));
            if defined != filter.defined {
                return;
            }
        }
        let mut binder = Binder::new(&state, false);
        if let Err(err) = binder.attach_attribute(object, node, segment, Rc::from(name)) {
            tracing::warn!(
                subscription = %state.id,
                object = %object.id(),
                name,
                error = %err,
                "could not bind added attribute"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Unregistration
// ---------------------------------------------------------------------------

/// Drop one reference to `node` on `object`; when it was the last, detach
/// it and everything registered below it.
pub(crate) fn unbind(state: &SubscriptionState, object: &Object, node: NodeId) {
    match state.tree.node(node) {
        SyntaxNode::Group(items) => {
            for item in items {
                unbind(state, object, *item);
            }
        }
        SyntaxNode::Segment(segment) => {
            let Some(binding) = state.table.release(object.id(), state.id, node) else {
                return;
            };
            binding.detach(object);
            tracing::trace!(subscription = %state.id, object = %object.id(), %node, "unbound");
            let Some(next) = segment.next() else {
                return;
            };
            for attr in binding.attrs.iter().filter(|attr| attr.linked) {
                let Ok(value) = object.get(&attr.name) else {
                    continue;
                };
                for target in (strategy(attr.kind).targets)(&value) {
                    unbind(state, &target, next);
                }
            }
        }
    }
}

/// Detach the bindings the root no longer reaches and reset the reference
/// counts of the others to the edges that reach them. Returns the number
/// detached.
pub(crate) fn sweep_unreachable(state: &SubscriptionState) -> usize {
    let Some(root) = state.root.upgrade() else {
        return 0;
    };
    let mut reached = FxHashMap::default();
    mark(state, &root, state.tree.root(), &mut reached);
    let swept = state.table.retain_reached(state.id, &reached);
    for (object, binding) in &swept {
        if let Some(object) = object.upgrade() {
            binding.detach(&object);
        }
    }
    swept.len()
}

/// Count one edge into `(object, node)` and, on the first, follow the
/// bound attributes downstream.
fn mark(
    state: &SubscriptionState,
    object: &Object,
    node: NodeId,
    reached: &mut FxHashMap<(ObjectId, NodeId), u32>,
) {
    match state.tree.node(node) {
        SyntaxNode::Group(items) => {
            for item in items {
                mark(state, object, *item, reached);
            }
        }
        SyntaxNode::Segment(segment) => {
            let Some(attrs) = state.table.linked_attrs(object.id(), state.id, node) else {
                return;
            };
            let refs = reached.entry((object.id(), node)).or_insert(0);
            *refs += 1;
            if *refs > 1 {
                return;
            }
            let Some(next) = segment.next() else {
                return;
            };
            for (name, kind) in attrs {
                let Ok(value) = object.get(&name) else {
                    continue;
                };
                for target in (strategy(kind).targets)(&value) {
                    mark(state, &target, next, reached);
                }
            }
        }
    }
}

/// Remove every binding of the subscription: walk from the root, then
/// sweep whatever the walk could not reach. Returns the number swept.
pub(crate) fn unbind_all(state: &SubscriptionState) -> usize {
    if let Some(root) = state.root.upgrade() {
        unbind(state, &root, state.tree.root());
    }
    let orphans = state.table.take_subscription(state.id);
    for (object, binding) in &orphans {
        if let Some(object) = object.upgrade() {
            binding.detach(&object);
        }
    }
    orphans.len()
}
