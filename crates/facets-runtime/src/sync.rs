#![forbid(unsafe_code)]

//! Keeping an attribute of one object in step with an attribute of another.
//!
//! Synchronization is built from ordinary subscriptions. When both sides are
//! collections of the same kind, in-place changes are replayed item by item
//! instead of reassigning the whole collection. A shared flag stops a
//! mutual pair from echoing a change back to its source.

use std::cell::Cell;
use std::rc::Rc;

use facets_core::{Change, ChangeEvent, CollectionKind, FacetError, Object, Value, WeakObject};
use smallvec::SmallVec;

use crate::dispatch::Handler;
use crate::error::ObserveError;
use crate::runtime::{ObserveOptions, Runtime, SubscriptionHandle};

/// Registrations created by [`Runtime::sync_attribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct SyncHandle {
    handles: SmallVec<[SubscriptionHandle; 2]>,
}

impl SyncHandle {
    pub fn handles(&self) -> &[SubscriptionHandle] {
        &self.handles
    }

    /// Whether changes flow both ways.
    #[must_use]
    pub fn is_mutual(&self) -> bool {
        self.handles.len() == 2
    }
}

/// Clears the echo flag when the copy finishes, even on unwind.
struct EchoGuard<'a>(&'a Cell<bool>);

impl<'a> EchoGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Runtime {
    /// Copy `source.source_name` into `target.target_name` now and on every
    /// later change. With `mutual`, changes to the target flow back too.
    ///
    /// # Errors
    ///
    /// Fails if either attribute is missing or a subscription cannot be
    /// registered. The initial copy is written last and may still be
    /// rejected by the target's validation. Nothing stays registered on
    /// error.
    pub fn sync_attribute(
        &self,
        source: &Object,
        source_name: &str,
        target: &Object,
        target_name: &str,
        mutual: bool,
    ) -> Result<SyncHandle, ObserveError> {
        let items = same_collection(source, source_name, target, target_name)?;
        let value = source.get(source_name)?;

        let echo = Rc::new(Cell::new(false));
        let mut handles = SmallVec::new();
        let registered = self
            .observe(
                source,
                pattern(source_name, items),
                copier(target, target_name, &echo),
                ObserveOptions::new(),
            )
            .and_then(|handle| {
                handles.push(handle);
                if mutual {
                    handles.push(self.observe(
                        target,
                        pattern(target_name, items),
                        copier(source, source_name, &echo),
                        ObserveOptions::new(),
                    )?);
                }
                let _guard = EchoGuard::enter(&echo);
                Ok(target.set(target_name, value)?)
            });
        if let Err(err) = registered {
            for handle in handles {
                self.unregister(handle);
            }
            return Err(err);
        }
        tracing::debug!(
            from = %source.id(),
            source_name,
            to = %target.id(),
            target_name,
            mutual,
            items,
            "attributes synchronized"
        );
        Ok(SyncHandle { handles })
    }

    /// Stop a synchronization. Returns `false` if it was already removed.
    pub fn unsync(&self, sync: SyncHandle) -> bool {
        sync.handles
            .into_iter()
            .fold(false, |removed, handle| self.unregister(handle) | removed)
    }
}

/// Whether both attributes are collections of the same kind.
fn same_collection(
    source: &Object,
    source_name: &str,
    target: &Object,
    target_name: &str,
) -> Result<bool, FacetError> {
    let kind = |object: &Object, name: &str| {
        object.facet_kind(name).ok_or_else(|| FacetError::MissingAttribute {
            class: object.class_name().to_string(),
            name: name.to_string(),
        })
    };
    let source_kind = kind(source, source_name)?;
    let target_kind = kind(target, target_name)?;
    Ok(source_kind == target_kind && source_kind != CollectionKind::Simple)
}

fn pattern(name: &str, items: bool) -> String {
    if items {
        format!("{name}[]")
    } else {
        name.to_string()
    }
}

fn copier(target: &Object, name: &str, echo: &Rc<Cell<bool>>) -> Handler {
    let target: WeakObject = target.downgrade();
    let name: Rc<str> = Rc::from(name);
    let echo = Rc::clone(echo);
    Handler::full(move |change| {
        let Some(_guard) = EchoGuard::enter(&echo) else {
            return;
        };
        let Some(target) = target.upgrade() else {
            return;
        };
        if let Err(err) = apply(change, &target, &name) {
            tracing::warn!(
                object = %target.id(),
                name = %name,
                error = %err,
                "attribute sync failed"
            );
        }
    })
}

/// Replay `change` onto `target.name`.
fn apply(change: &Change, target: &Object, name: &str) -> Result<(), FacetError> {
    match &change.event {
        ChangeEvent::Scalar { new, .. } => target.set(name, new.clone()),
        ChangeEvent::Sequence(diff) => {
            let list = target.facet_list(name)?;
            let end = diff.index + diff.removed.len();
            list.set_slice(diff.index..end, diff.added.clone())
        }
        ChangeEvent::Map(diff) => {
            let dict = target.facet_dict(name)?;
            for key in diff.removed.keys() {
                dict.pop_or(key, Value::None);
            }
            let source = change.object.facet_dict(&change.name)?;
            for key in diff.added.keys().chain(diff.changed.keys()) {
                if let Some(value) = source.get(key) {
                    dict.insert(key.clone(), value)?;
                }
            }
            Ok(())
        }
        ChangeEvent::Set(diff) => {
            let set = target.facet_set(name)?;
            set.difference_update(diff.removed.iter().cloned());
            set.update(diff.added.iter().cloned())
        }
    }
}
