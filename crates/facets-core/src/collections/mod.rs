#![forbid(unsafe_code)]

//! Observable collections.
//!
//! [`FacetList`], [`FacetDict`] and [`FacetSet`] wrap their contents in
//! shared storage (`Rc<RefCell<..>>`) and turn every mutation into an
//! itemized diff. A diff is delivered to
//!
//! - the owning object, as an items [`ChangeEvent`] on the attribute the
//!   collection is bound to (unless its `ListSpec`, `DictSpec` or `SetSpec` turns items events off), and
//! - every live direct subscriber registered with `subscribe`.
//!
//! # Invariants
//!
//! 1. Validation and bounds checks run before anything is committed. A
//!    failing operation leaves the contents untouched and emits nothing.
//! 2. No event is emitted when an operation leaves the contents unchanged.
//! 3. No `RefCell` borrow is held while callbacks run, so a callback may
//!    read or mutate the collection that notified it.
//!
//! # Failure Modes
//!
//! - **Replaced proxy**: once the owning attribute is reassigned, the old
//!   proxy is detached. Mutating it still works and still reaches direct
//!   subscribers, but the former owner hears nothing.

mod dict;
mod list;
mod set;

pub use dict::{DictSpec, FacetDict};
pub use list::{FacetList, ListSpec};
pub use set::{FacetSet, SetSpec};

use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::event::ChangeEvent;
use crate::object::{Object, WeakObject};

/// Storage shape of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Simple,
    List,
    Dict,
    Set,
}

type DiffCallback = dyn Fn(&ChangeEvent);

/// RAII guard for a direct collection subscriber.
///
/// Dropping the guard drops the callback; the collection prunes the dead
/// entry on its next mutation.
pub struct Subscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Where a collection reports its diffs.
#[derive(Default)]
pub(crate) struct Link {
    owner: Option<(WeakObject, Rc<str>)>,
    subscribers: Vec<Weak<DiffCallback>>,
}

impl Link {
    pub(crate) fn attach(&mut self, owner: WeakObject, name: Rc<str>) {
        self.owner = Some((owner, name));
    }

    pub(crate) fn detach(&mut self) {
        self.owner = None;
    }

    /// Attribute name this collection is bound to, for error messages.
    pub(crate) fn name(&self) -> &str {
        self.owner.as_ref().map_or("", |(_, name)| &**name)
    }

    pub(crate) fn owner(&self) -> Option<(Object, Rc<str>)> {
        let (weak, name) = self.owner.as_ref()?;
        Some((weak.upgrade()?, Rc::clone(name)))
    }

    pub(crate) fn subscribe(&mut self, callback: impl Fn(&ChangeEvent) + 'static) -> Subscription {
        let strong: Rc<DiffCallback> = Rc::new(callback);
        self.subscribers.push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Snapshot the delivery targets. Call while borrowed, emit after release.
    pub(crate) fn targets(&mut self, has_items: bool) -> Targets {
        self.subscribers.retain(|w| w.strong_count() > 0);
        Targets {
            owner: if has_items { self.owner() } else { None },
            subscribers: self.subscribers.iter().filter_map(Weak::upgrade).collect(),
        }
    }
}

pub(crate) struct Targets {
    owner: Option<(Object, Rc<str>)>,
    subscribers: SmallVec<[Rc<DiffCallback>; 2]>,
}

impl Targets {
    pub(crate) fn emit(self, event: ChangeEvent) {
        for callback in &self.subscribers {
            callback(&event);
        }
        if let Some((object, name)) = self.owner {
            object.items_changed(&name, event);
        }
    }
}
