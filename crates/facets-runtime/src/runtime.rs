#![forbid(unsafe_code)]

//! The binding runtime: parsed-pattern cache, subscription registry,
//! dispatch policies and the subscription table.
//!
//! A [`Runtime`] is an explicit registry. Free functions ([`observe`],
//! [`unregister`], [`parse`]) use a thread-local default instance, which
//! [`Runtime::reset`] returns to an empty state in tests.
//!
//! # Invariants
//!
//! 1. After `unregister(handle)` returns, no notifier or facet-added hook of
//!    that subscription remains on any live object and its queued
//!    invocations are dropped.
//! 2. A failed `observe` leaves nothing behind.
//! 3. The table holds only weak object handles.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use facets_core::Object;
use facets_path::{CacheStats, PatternCache, SyntaxError, SyntaxTree};
use rustc_hash::FxHashMap;

use crate::binding::{Binder, SubscriptionState, unbind_all};
use crate::config::RuntimeConfig;
use crate::dispatch::{Dispatcher, IntoHandler, TaskQueue};
use crate::error::ObserveError;
use crate::table::{BindingInfo, SubscriptionId, SubscriptionTable};

/// Synchronous dispatch.
pub const DISPATCH_SAME: &str = "same";
/// Deferred dispatch on the runtime's task queue.
pub const DISPATCH_NEW: &str = "new";

/// Subscription ids are unique across runtimes, so a handle can never
/// remove another runtime's subscription.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// A path pattern, as text or already parsed.
#[derive(Debug, Clone)]
pub enum Pattern {
    Text(String),
    Tree(Arc<SyntaxTree>),
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for Pattern {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<Arc<SyntaxTree>> for Pattern {
    fn from(tree: Arc<SyntaxTree>) -> Self {
        Self::Tree(tree)
    }
}

impl From<SyntaxTree> for Pattern {
    fn from(tree: SyntaxTree) -> Self {
        Self::Tree(Arc::new(tree))
    }
}

/// Options for [`Runtime::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveOptions {
    /// `false` treats every `.` in the pattern as `:`.
    pub notify: bool,
    /// Dispatch policy name. `None` uses [`RuntimeConfig::default_dispatch`].
    pub dispatch: Option<String>,
    /// Skip downstream registration until intermediates are next assigned.
    pub deferred: bool,
    /// Place this subscription's notifiers ahead of existing ones.
    pub priority: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            notify: true,
            dispatch: None,
            deferred: false,
            priority: false,
        }
    }
}

impl ObserveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    #[must_use]
    pub fn dispatch(mut self, dispatch: impl Into<String>) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    #[must_use]
    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }
}

/// Opaque token for one registration, consumed by [`Runtime::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "dropping the handle leaves the subscription registered with no way to remove it"]
pub struct SubscriptionHandle {
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    cache: RefCell<PatternCache>,
    table: Rc<SubscriptionTable>,
    subscriptions: RefCell<FxHashMap<SubscriptionId, Rc<SubscriptionState>>>,
    dispatchers: RefCell<FxHashMap<Rc<str>, Rc<dyn Dispatcher>>>,
    tasks: Rc<TaskQueue>,
}

/// Subscription registry and binding engine.
///
/// Cloning shares the same registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let tasks = Rc::new(TaskQueue::new());
        let mut dispatchers: FxHashMap<Rc<str>, Rc<dyn Dispatcher>> = FxHashMap::default();
        dispatchers.insert(Rc::from(DISPATCH_NEW), Rc::clone(&tasks) as Rc<dyn Dispatcher>);
        Self {
            inner: Rc::new(RuntimeInner {
                cache: RefCell::new(PatternCache::new(config.pattern_cache_capacity)),
                config,
                table: Rc::new(SubscriptionTable::new()),
                subscriptions: RefCell::new(FxHashMap::default()),
                dispatchers: RefCell::new(dispatchers),
                tasks,
            }),
        }
    }

    /// Runtime configured from `FACETS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let parsed = RuntimeConfig::from_env_with_diagnostics();
        for error in &parsed.errors {
            tracing::warn!(%error, "ignoring invalid runtime setting");
        }
        Self::new(parsed.config)
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Parse `pattern` through the runtime's cache.
    pub fn parse(&self, pattern: &str) -> Result<Arc<SyntaxTree>, SyntaxError> {
        self.inner.cache.borrow_mut().get_or_parse(pattern)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.borrow().stats()
    }

    /// Register `name` as a dispatch policy. Returns the dispatcher it
    /// replaced. `"same"` cannot be replaced.
    pub fn register_dispatcher(
        &self,
        name: impl Into<Rc<str>>,
        dispatcher: Rc<dyn Dispatcher>,
    ) -> Option<Rc<dyn Dispatcher>> {
        let name = name.into();
        if &*name == DISPATCH_SAME {
            tracing::warn!("the 'same' dispatch policy cannot be replaced");
            return None;
        }
        tracing::debug!(name = %name, "dispatcher registered");
        self.inner.dispatchers.borrow_mut().insert(name, dispatcher)
    }

    fn resolve_dispatch(&self, name: &str) -> Result<Option<Rc<dyn Dispatcher>>, ObserveError> {
        if name == DISPATCH_SAME {
            return Ok(None);
        }
        self.inner
            .dispatchers
            .borrow()
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| ObserveError::UnknownDispatch(name.to_string()))
    }

    /// Subscribe `handler` to changes matching `pattern`, starting at `root`.
    ///
    /// # Errors
    ///
    /// - [`ObserveError::Syntax`] if the pattern does not parse.
    /// - [`ObserveError::UnknownDispatch`] for an unregistered policy name.
    /// - [`ObserveError::MissingAttribute`] when a non-optional segment names
    ///   an attribute an object on the path lacks.
    /// - [`ObserveError::SignatureIncompatible`] when a value-only handler
    ///   would be notified by an intermediate segment it cannot serve.
    ///
    /// On error nothing stays registered.
    pub fn observe<M>(
        &self,
        root: &Object,
        pattern: impl Into<Pattern>,
        handler: impl IntoHandler<M>,
        options: ObserveOptions,
    ) -> Result<SubscriptionHandle, ObserveError> {
        let tree = match pattern.into() {
            Pattern::Text(text) => self.parse(&text)?,
            Pattern::Tree(tree) => tree,
        };
        let span = tracing::debug_span!("observe", pattern = tree.source(), root = %root.id());
        let _enter = span.enter();

        let tree = if options.deferred {
            Arc::new(tree.with_deferred())
        } else {
            tree
        };
        let dispatch: Rc<str> = Rc::from(
            options
                .dispatch
                .as_deref()
                .unwrap_or(self.inner.config.default_dispatch.as_str()),
        );
        let dispatcher = self.resolve_dispatch(&dispatch)?;

        let pruned = self.inner.table.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned bindings of dropped objects");
        }

        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        let state = Rc::new(SubscriptionState {
            id,
            tree: Arc::clone(&tree),
            handler: handler.into_handler(),
            dispatch,
            dispatcher,
            notify: options.notify,
            priority: options.priority,
            trace: self.inner.config.trace_notifications,
            root: root.downgrade(),
            table: Rc::clone(&self.inner.table),
            active: Cell::new(true),
            depth: Rc::new(Cell::new(0)),
        });

        if let Err(err) = Binder::new(&state, true).register(root, tree.root()) {
            state.active.set(false);
            unbind_all(&state);
            tracing::debug!(subscription = %id, error = %err, "observe rolled back");
            return Err(err);
        }
        tracing::debug!(subscription = %id, handler = state.handler.shape(), "subscription registered");
        self.inner.subscriptions.borrow_mut().insert(id, state);
        Ok(SubscriptionHandle { id })
    }

    /// Remove every listener of `handle`. Returns `false` if it was not
    /// registered with this runtime.
    pub fn unregister(&self, handle: SubscriptionHandle) -> bool {
        let span = tracing::debug_span!("unregister", subscription = %handle.id);
        let _enter = span.enter();
        let Some(state) = self.inner.subscriptions.borrow_mut().remove(&handle.id) else {
            tracing::debug!("unknown subscription");
            return false;
        };
        state.active.set(false);
        let orphans = unbind_all(&state);
        tracing::debug!(orphans, "subscription removed");
        true
    }

    /// Whether `handle` is still registered.
    #[must_use]
    pub fn is_registered(&self, handle: SubscriptionHandle) -> bool {
        self.inner.subscriptions.borrow().contains_key(&handle.id)
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }

    /// Run invocations queued by the `"new"` policy. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        self.inner.tasks.run_pending()
    }

    /// Invocations waiting in the `"new"` queue.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Bindings every subscription holds on `object`.
    #[must_use]
    pub fn bindings_for(&self, object: &Object) -> Vec<BindingInfo> {
        self.inner.table.bindings_for(object.id())
    }

    #[must_use]
    pub fn table(&self) -> &SubscriptionTable {
        &self.inner.table
    }

    /// Unregister everything, drop queued invocations and empty the cache.
    pub fn reset(&self) {
        let states: Vec<Rc<SubscriptionState>> = self
            .inner
            .subscriptions
            .borrow_mut()
            .drain()
            .map(|(_, state)| state)
            .collect();
        for state in &states {
            state.active.set(false);
            unbind_all(state);
        }
        for (object, binding) in self.inner.table.clear() {
            if let Some(object) = object.upgrade() {
                binding.detach(&object);
            }
        }
        self.inner.tasks.clear();
        self.inner.cache.borrow_mut().clear();
        tracing::debug!(subscriptions = states.len(), "runtime reset");
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("subscriptions", &self.subscription_count())
            .field("table", &*self.inner.table)
            .field("pending", &self.pending())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Default runtime
// ---------------------------------------------------------------------------

thread_local! {
    static DEFAULT_RUNTIME: Runtime = Runtime::from_env();
}

/// Run `f` with this thread's default runtime.
pub fn with_default<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    DEFAULT_RUNTIME.with(f)
}

/// [`Runtime::observe`] on the default runtime.
pub fn observe<M>(
    root: &Object,
    pattern: impl Into<Pattern>,
    handler: impl IntoHandler<M>,
    options: ObserveOptions,
) -> Result<SubscriptionHandle, ObserveError> {
    with_default(|runtime| runtime.observe(root, pattern, handler, options))
}

/// [`Runtime::unregister`] on the default runtime.
pub fn unregister(handle: SubscriptionHandle) -> bool {
    with_default(|runtime| runtime.unregister(handle))
}

/// [`Runtime::parse`] on the default runtime.
pub fn parse(pattern: &str) -> Result<Arc<SyntaxTree>, SyntaxError> {
    with_default(|runtime| runtime.parse(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facets_core::{Change, FacetDecl, ListSpec, Value};
    use tracing_test::traced_test;

    fn person() -> Object {
        Object::builder("Person")
            .facet("name", FacetDecl::simple("anon"))
            .facet("age", FacetDecl::simple(0))
            .facet("friend", FacetDecl::any())
            .facet("pets", FacetDecl::list(ListSpec::new()))
            .build()
    }

    fn counter() -> (Rc<Cell<usize>>, impl Fn() + 'static) {
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        (hits, move || sink.set(sink.get() + 1))
    }

    #[test]
    fn handle_ids_are_unique() {
        let runtime = Runtime::default();
        let p = person();
        let a = runtime.observe(&p, "name", || {}, ObserveOptions::new()).unwrap();
        let b = runtime.observe(&p, "name", || {}, ObserveOptions::new()).unwrap();
        assert_ne!(a, b);
        assert_eq!(runtime.subscription_count(), 2);
    }

    #[test]
    fn unregister_twice_reports_false() {
        let runtime = Runtime::default();
        let p = person();
        let handle = runtime.observe(&p, "name", || {}, ObserveOptions::new()).unwrap();
        assert!(runtime.unregister(handle));
        assert!(!runtime.unregister(handle));
        assert!(!runtime.is_registered(handle));
    }

    #[test]
    fn handles_are_scoped_to_their_runtime() {
        let (first, second) = (Runtime::default(), Runtime::default());
        let p = person();
        let handle = first.observe(&p, "name", || {}, ObserveOptions::new()).unwrap();
        let other = second.observe(&p, "age", || {}, ObserveOptions::new()).unwrap();
        assert_ne!(handle.id(), other.id());
        assert!(!second.unregister(handle));
        assert!(second.unregister(other));
        assert_eq!(p.notifier_count(), 1);
        assert!(first.unregister(handle));
        assert_eq!(p.notifier_count(), 0);
    }

    #[test]
    fn patterns_are_cached() {
        let runtime = Runtime::default();
        let p = person();
        let a = runtime.observe(&p, "name", || {}, ObserveOptions::new()).unwrap();
        let b = runtime.observe(&p, " name ", || {}, ObserveOptions::new()).unwrap();
        let stats = runtime.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        runtime.unregister(a);
        runtime.unregister(b);
    }

    #[test]
    fn unknown_dispatch_is_rejected() {
        let runtime = Runtime::default();
        let p = person();
        let err = runtime
            .observe(&p, "name", || {}, ObserveOptions::new().dispatch("ui"))
            .unwrap_err();
        assert_eq!(err, ObserveError::UnknownDispatch("ui".into()));
        assert_eq!(p.notifier_count(), 0);
    }

    #[test]
    fn default_dispatch_comes_from_config() {
        let runtime = Runtime::new(RuntimeConfig {
            default_dispatch: DISPATCH_NEW.to_string(),
            ..RuntimeConfig::default()
        });
        let p = person();
        let (hits, handler) = counter();
        let _handle = runtime.observe(&p, "age", handler, ObserveOptions::new()).unwrap();
        p.set("age", 3).unwrap();
        assert_eq!(hits.get(), 0);
        assert_eq!(runtime.pending(), 1);
        assert_eq!(runtime.run_pending(), 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn same_cannot_be_replaced() {
        let runtime = Runtime::default();
        assert!(
            runtime
                .register_dispatcher(DISPATCH_SAME, Rc::new(TaskQueue::new()))
                .is_none()
        );
        let p = person();
        let (hits, handler) = counter();
        let _handle = runtime.observe(&p, "age", handler, ObserveOptions::new()).unwrap();
        p.set("age", 1).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let runtime = Runtime::default();
        let p = person();
        let friend = person();
        p.set("friend", friend.clone()).unwrap();
        let _a = runtime.observe(&p, "friend.name", || {}, ObserveOptions::new()).unwrap();
        let _b = runtime
            .observe(&p, "age", || {}, ObserveOptions::new().dispatch(DISPATCH_NEW))
            .unwrap();
        p.set("age", 9).unwrap();
        assert_eq!(runtime.pending(), 1);

        runtime.reset();
        assert!(runtime.table().is_empty());
        assert_eq!(runtime.subscription_count(), 0);
        assert_eq!(runtime.pending(), 0);
        assert_eq!(p.notifier_count() + friend.notifier_count(), 0);
    }

    #[test]
    fn free_functions_use_the_default_runtime() {
        let p = person();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handle = observe(
            &p,
            "name",
            move |c: &Change| sink.borrow_mut().push(c.new_value().cloned()),
            ObserveOptions::new(),
        )
        .unwrap();
        p.set("name", "ada").unwrap();
        assert!(unregister(handle));
        p.set("name", "bob").unwrap();
        assert_eq!(*seen.borrow(), vec![Some(Value::from("ada"))]);
        assert!(parse("a.b").is_ok());
        assert!(parse("a..b").is_err());
    }

    #[test]
    #[traced_test]
    fn observe_and_unregister_are_logged() {
        let runtime = Runtime::default();
        let p = person();
        let handle = runtime.observe(&p, "name", || {}, ObserveOptions::new()).unwrap();
        assert!(logs_contain("subscription registered"));
        assert!(logs_contain("attribute bound"));
        runtime.unregister(handle);
        assert!(logs_contain("subscription removed"));
    }

    #[test]
    #[traced_test]
    fn trace_notifications_logs_invocations() {
        let runtime = Runtime::new(RuntimeConfig {
            trace_notifications: true,
            ..RuntimeConfig::default()
        });
        let p = person();
        let _handle = runtime.observe(&p, "age", || {}, ObserveOptions::new()).unwrap();
        p.set("age", 41).unwrap();
        assert!(logs_contain("notify"));
        assert!(logs_contain("handler=\"notify\""));
    }

    #[test]
    #[traced_test]
    fn fire_time_binding_failures_are_logged() {
        let runtime = Runtime::default();
        let p = person();
        let _handle = runtime
            .observe(&p, "friend.name", || {}, ObserveOptions::new())
            .unwrap();
        let stranger = Object::builder("Robot").facet("serial", FacetDecl::simple(1)).build();
        p.set("friend", stranger).unwrap();
        assert!(logs_contain("could not bind newly assigned object"));
        assert!(logs_contain("'Robot' object has no attribute 'name'"));
    }
}
