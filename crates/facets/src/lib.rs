#![forbid(unsafe_code)]

//! Facets: observable attributes with path-based change notification.
//!
//! This crate re-exports the three layers:
//!
//! - [`model`]: objects, values and observable collections.
//! - [`path`]: the pattern language (`owner.[name,age]`, `children*.value`).
//! - [`runtime`]: subscriptions that follow a pattern through a live graph.
//!
//! ```
//! use facets::prelude::*;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let node = || {
//!     Object::builder("Node")
//!         .facet("value", FacetDecl::simple(0))
//!         .facet("children", FacetDecl::list(ListSpec::new()))
//!         .build()
//! };
//! let (root, leaf) = (node(), node());
//!
//! let hits = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&hits);
//! let handle = facets::observe(&root, "children:value", move || counter.set(counter.get() + 1), ObserveOptions::new())
//!     .unwrap();
//!
//! root.facet_list("children").unwrap().append(Value::from(leaf.clone())).unwrap();
//! leaf.set("value", 3).unwrap();
//! assert_eq!(hits.get(), 1);
//! assert!(facets::unregister(handle));
//! ```

pub use facets_core as model;
pub use facets_path as path;
pub use facets_runtime as runtime;

pub use facets_runtime::{observe, parse, unregister, with_default};

/// The names most programs need.
pub mod prelude {
    pub use facets_core::{
        Change, ChangeEvent, DictSpec, FacetDecl, FacetError, ListSpec, Object, SetSpec,
        Validator, Value,
    };
    pub use facets_path::SyntaxTree;
    pub use facets_runtime::{
        Dispatcher, Handler, ObserveError, ObserveOptions, Runtime, SubscriptionHandle,
        SyncHandle,
    };
}
