#![forbid(unsafe_code)]

//! Binding runtime for Facets.
//!
//! [`Runtime::observe`] parses a path pattern, attaches listeners along the
//! path starting at a root object, and keeps them attached to whatever
//! objects the intermediate attributes hold over time.
//!
//! ```
//! use facets_core::{FacetDecl, Object, Value};
//! use facets_runtime::{ObserveOptions, Runtime};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let person = |name: &str| {
//!     Object::builder("Person")
//!         .facet("name", FacetDecl::simple(name))
//!         .facet("friend", FacetDecl::any())
//!         .build()
//! };
//! let (ann, bo, cy) = (person("ann"), person("bo"), person("cy"));
//! ann.set("friend", bo.clone()).unwrap();
//!
//! let runtime = Runtime::default();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = Rc::clone(&seen);
//! let handle = runtime
//!     .observe(&ann, "friend.name", move |v: &Value| sink.borrow_mut().push(v.clone()), ObserveOptions::new())
//!     .unwrap();
//!
//! bo.set("name", "bob").unwrap();
//! ann.set("friend", cy.clone()).unwrap();
//! bo.set("name", "ignored").unwrap();
//! assert_eq!(*seen.borrow(), vec![Value::from("bob"), Value::from("cy")]);
//!
//! runtime.unregister(handle);
//! assert!(runtime.table().is_empty());
//! ```

mod binding;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod runtime;
pub mod sync;
pub mod table;

pub use config::{ConfigError, RuntimeConfig, RuntimeConfigParse};
pub use dispatch::{Dispatcher, Handler, IntoHandler, TaskQueue};
pub use error::ObserveError;
pub use runtime::{
    DISPATCH_NEW, DISPATCH_SAME, ObserveOptions, Pattern, Runtime, SubscriptionHandle, observe,
    parse, unregister, with_default,
};
pub use sync::SyncHandle;
pub use table::{BindingInfo, BindingKind, SubscriptionId, SubscriptionTable};
