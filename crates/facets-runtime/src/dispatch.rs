#![forbid(unsafe_code)]

//! Handler shapes and dispatch policies.
//!
//! A handler is classified once, when it is handed to
//! [`Runtime::observe`](crate::Runtime::observe), into one of three shapes:
//!
//! | Shape | Closure | Receives |
//! |-------|---------|----------|
//! | [`Handler::Notify`] | `Fn()` | nothing |
//! | [`Handler::Value`] | `Fn(&Value)` | the new value |
//! | [`Handler::Full`] | `Fn(&Change)` | object, attribute name and event |
//!
//! Invocations run synchronously (`"same"`) or are handed to a
//! [`Dispatcher`]. `"new"` is served by the runtime's own [`TaskQueue`],
//! drained with [`Runtime::run_pending`](crate::Runtime::run_pending).
//!
//! # Failure Modes
//!
//! - **Reentrant notification**: while a handler of a subscription runs, a
//!   further notification of the same subscription is skipped. The state
//!   change that caused it is kept.
//! - **Handler panic**: not caught. The reentry counter is restored by its
//!   guard during unwinding.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use facets_core::{Change, Value};

/// Executes handler invocations on behalf of a named dispatch policy.
///
/// The runtime never waits on a scheduled invocation.
pub trait Dispatcher {
    fn schedule(&self, invocation: Box<dyn FnOnce()>);
}

/// A change handler, classified by the arguments it accepts.
#[derive(Clone)]
pub enum Handler {
    Notify(Rc<dyn Fn()>),
    Value(Rc<dyn Fn(&Value)>),
    Full(Rc<dyn Fn(&Change)>),
}

impl Handler {
    pub fn notify(f: impl Fn() + 'static) -> Self {
        Self::Notify(Rc::new(f))
    }

    pub fn value(f: impl Fn(&Value) + 'static) -> Self {
        Self::Value(Rc::new(f))
    }

    pub fn full(f: impl Fn(&Change) + 'static) -> Self {
        Self::Full(Rc::new(f))
    }

    /// Whether the handler only takes the new value.
    #[must_use]
    pub const fn is_value_only(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Notify(_) => "notify",
            Self::Value(_) => "value",
            Self::Full(_) => "full",
        }
    }

    /// Call the handler with whichever argument its shape takes.
    pub(crate) fn call(&self, change: &Change, value: &Value) {
        match self {
            Self::Notify(f) => f(),
            Self::Value(f) => f(value),
            Self::Full(f) => f(change),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// Conversion of closures into a [`Handler`].
///
/// The marker parameter keeps the closure impls apart; it is inferred.
/// Closure arguments need explicit types (`|v: &Value| ..`).
pub trait IntoHandler<Marker> {
    fn into_handler(self) -> Handler;
}

#[doc(hidden)]
pub struct NotifyMarker;
#[doc(hidden)]
pub struct ValueMarker;
#[doc(hidden)]
pub struct FullMarker;
#[doc(hidden)]
pub struct HandlerMarker;

impl<F: Fn() + 'static> IntoHandler<NotifyMarker> for F {
    fn into_handler(self) -> Handler {
        Handler::notify(self)
    }
}

impl<F: Fn(&Value) + 'static> IntoHandler<ValueMarker> for F {
    fn into_handler(self) -> Handler {
        Handler::value(self)
    }
}

impl<F: Fn(&Change) + 'static> IntoHandler<FullMarker> for F {
    fn into_handler(self) -> Handler {
        Handler::full(self)
    }
}

impl IntoHandler<HandlerMarker> for Handler {
    fn into_handler(self) -> Handler {
        self
    }
}

// ---------------------------------------------------------------------------
// Task queue
// ---------------------------------------------------------------------------

/// FIFO of deferred invocations backing the `"new"` policy.
#[derive(Default)]
pub struct TaskQueue {
    tasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(task) = self.tasks.borrow_mut().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Drop every queued task without running it.
    pub fn clear(&self) {
        self.tasks.borrow_mut().clear();
    }
}

impl Dispatcher for TaskQueue {
    fn schedule(&self, invocation: Box<dyn FnOnce()>) {
        self.tasks.borrow_mut().push_back(invocation);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("len", &self.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// Reentry guard
// ---------------------------------------------------------------------------

/// Raises a subscription's reentry depth while a handler runs.
pub(crate) struct ReentryGuard {
    depth: Rc<Cell<u32>>,
}

impl ReentryGuard {
    pub(crate) fn enter(depth: &Rc<Cell<u32>>) -> Self {
        depth.set(depth.get() + 1);
        Self {
            depth: Rc::clone(depth),
        }
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facets_core::{ChangeEvent, FacetDecl, Object};

    fn change() -> Change {
        let object = Object::builder("Thing")
            .facet("x", FacetDecl::simple(0))
            .build();
        Change {
            object,
            name: Rc::from("x"),
            event: ChangeEvent::Scalar {
                old: Value::Int(0),
                new: Value::Int(1),
            },
        }
    }

    fn classify<M>(handler: impl IntoHandler<M>) -> Handler {
        handler.into_handler()
    }

    #[test]
    fn closures_are_classified_by_arity() {
        assert_eq!(classify(|| {}).shape(), "notify");
        assert_eq!(classify(|_: &Value| {}).shape(), "value");
        assert_eq!(classify(|_: &Change| {}).shape(), "full");
        assert!(classify(Handler::value(|_| {})).is_value_only());
    }

    #[test]
    fn call_passes_the_shape_argument() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handler = Handler::value(move |v| sink.borrow_mut().push(v.clone()));
        handler.call(&change(), &Value::Int(7));

        let sink = Rc::clone(&seen);
        let handler = Handler::full(move |c| sink.borrow_mut().push(c.new_value().cloned().unwrap_or_default()));
        handler.call(&change(), &Value::None);

        assert_eq!(*seen.borrow(), vec![Value::Int(7), Value::Int(1)]);
    }

    #[test]
    fn task_queue_runs_in_order_including_nested() {
        let queue = Rc::new(TaskQueue::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let (q, l) = (Rc::clone(&queue), Rc::clone(&log));
        queue.schedule(Box::new(move || {
            l.borrow_mut().push(1);
            let l = Rc::clone(&l);
            q.schedule(Box::new(move || l.borrow_mut().push(3)));
        }));
        let l = Rc::clone(&log);
        queue.schedule(Box::new(move || l.borrow_mut().push(2)));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.run_pending(), 3);
        assert!(queue.is_empty());
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn reentry_guard_restores_depth() {
        let depth = Rc::new(Cell::new(0));
        {
            let _outer = ReentryGuard::enter(&depth);
            let _inner = ReentryGuard::enter(&depth);
            assert_eq!(depth.get(), 2);
        }
        assert_eq!(depth.get(), 0);
    }
}
