#![forbid(unsafe_code)]

//! Objects, values and observable collections for Facets.
//!
//! An [`Object`] carries declared attributes. Assigning one notifies the
//! notifiers registered on it with a [`Change`]; collection attributes
//! ([`FacetList`], [`FacetDict`], [`FacetSet`]) additionally report in-place
//! mutations as itemized diffs.
//!
//! ```
//! use facets_core::{Channel, FacetDecl, ListSpec, NotifyTarget, Object, Value};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let person = Object::builder("Person")
//!     .facet("name", FacetDecl::simple("anon"))
//!     .facet("pets", FacetDecl::list(ListSpec::new()))
//!     .build();
//!
//! let hits = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&hits);
//! person
//!     .add_notifier(NotifyTarget::AnyAttribute, Channel::Both, false, move |_| {
//!         counter.set(counter.get() + 1);
//!     })
//!     .unwrap();
//!
//! person.set("name", "ada").unwrap();
//! person.facet_list("pets").unwrap().append(Value::from("cat")).unwrap();
//! assert_eq!(hits.get(), 2);
//! ```

pub mod collections;
pub mod error;
pub mod event;
pub mod object;
pub mod validate;
pub mod value;

pub use collections::{
    CollectionKind, DictSpec, FacetDict, FacetList, FacetSet, ListSpec, SetSpec, Subscription,
};
pub use error::{FacetError, ValidationContext};
pub use event::{Change, ChangeEvent, DictDiff, ListDiff, SetDiff, ValueMap};
pub use object::{
    Channel, FacetDecl, FacetKind, HookId, NotifierId, NotifyTarget, Object, ObjectBuilder,
    ObjectId, WeakObject,
};
pub use validate::Validator;
pub use value::Value;
