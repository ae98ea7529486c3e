#![forbid(unsafe_code)]

//! Change events delivered to notifiers.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::object::Object;
use crate::value::Value;

/// Insertion-ordered map used for dict contents and diffs.
pub type ValueMap = IndexMap<Value, Value, FxBuildHasher>;

/// Splice applied to a sequence: `removed` was replaced by `added` at `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDiff {
    pub index: usize,
    pub removed: Vec<Value>,
    pub added: Vec<Value>,
}

impl ListDiff {
    /// Replay this splice onto `items`, turning the old contents into the new.
    pub fn apply(&self, items: &mut Vec<Value>) {
        let end = (self.index + self.removed.len()).min(items.len());
        let start = self.index.min(end);
        items.splice(start..end, self.added.iter().cloned());
    }
}

/// Mapping diff. Every key touched by an operation is in exactly one of the
/// three maps; `changed` and `removed` hold the values before the change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictDiff {
    pub added: ValueMap,
    pub changed: ValueMap,
    pub removed: ValueMap,
}

impl DictDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    pub added: Vec<Value>,
    pub removed: Vec<Value>,
}

/// What happened to an attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The attribute was assigned.
    Scalar { old: Value, new: Value },
    /// Items of a sequence attribute changed in place.
    Sequence(ListDiff),
    /// Entries of a mapping attribute changed in place.
    Map(DictDiff),
    /// Members of a set attribute changed in place.
    Set(SetDiff),
}

impl ChangeEvent {
    /// Whether this is an in-place collection change rather than an assignment.
    #[must_use]
    pub const fn is_items(&self) -> bool {
        !matches!(self, Self::Scalar { .. })
    }

    /// Values that left the attribute: the old value of an assignment, or
    /// the removed (and, for maps, replaced) items.
    #[must_use]
    pub fn removed_values(&self) -> Vec<Value> {
        match self {
            Self::Scalar { old, .. } => vec![old.clone()],
            Self::Sequence(diff) => diff.removed.clone(),
            Self::Map(diff) => diff
                .changed
                .values()
                .chain(diff.removed.values())
                .cloned()
                .collect(),
            Self::Set(diff) => diff.removed.clone(),
        }
    }

    /// Values that entered the attribute. For map `changed` entries the new
    /// value is not recorded in the diff; `current` supplies it by key.
    #[must_use]
    pub fn added_values(&self, current: Option<&ValueMap>) -> Vec<Value> {
        match self {
            Self::Scalar { new, .. } => vec![new.clone()],
            Self::Sequence(diff) => diff.added.clone(),
            Self::Map(diff) => {
                let mut out: Vec<Value> = diff.added.values().cloned().collect();
                if let Some(current) = current {
                    out.extend(diff.changed.keys().filter_map(|k| current.get(k).cloned()));
                }
                out
            }
            Self::Set(diff) => diff.added.clone(),
        }
    }
}

/// A change notification: `event` happened to attribute `name` of `object`.
#[derive(Clone)]
pub struct Change {
    pub object: Object,
    pub name: Rc<str>,
    pub event: ChangeEvent,
}

impl Change {
    /// New value of an assignment, or `None` for an items event.
    #[must_use]
    pub fn new_value(&self) -> Option<&Value> {
        match &self.event {
            ChangeEvent::Scalar { new, .. } => Some(new),
            _ => None,
        }
    }

    #[must_use]
    pub fn old_value(&self) -> Option<&Value> {
        match &self.event {
            ChangeEvent::Scalar { old, .. } => Some(old),
            _ => None,
        }
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("object", &self.object)
            .field("name", &self.name)
            .field("event", &self.event)
            .finish()
    }
}
