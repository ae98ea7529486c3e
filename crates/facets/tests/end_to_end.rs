#![forbid(unsafe_code)]

//! End-to-end scenarios across all three layers: a small address book whose
//! views follow selections, validated edits and mirrored attributes.

use std::cell::RefCell;
use std::rc::Rc;

use facets::prelude::*;
use facets::runtime::TaskQueue;
use tracing::{Level, info};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init();
}

fn contact(name: &str, age: i64) -> Object {
    Object::builder("Contact")
        .facet("name", FacetDecl::simple(name).validator(Validator::string()))
        .facet("age", FacetDecl::simple(age).validator(Validator::int_range(0, 150)))
        .facet("tags", FacetDecl::set(SetSpec::new()))
        .build()
}

fn book() -> Object {
    Object::builder("Book")
        .facet(
            "selected",
            FacetDecl::any().validator(Validator::instance_of("Contact", true)),
        )
        .facet("contacts", FacetDecl::list(ListSpec::new()))
        .facet("index", FacetDecl::dict(DictSpec::new()))
        .build()
}

#[test]
fn view_follows_selection() {
    init_tracing();
    let runtime = Runtime::default();
    let (book, ann, bo) = (book(), contact("ann", 30), contact("bo", 41));
    book.set("selected", ann.clone()).unwrap();

    let shown = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&shown);
    let handle = runtime
        .observe(
            &book,
            "selected.name",
            move |name: &Value| sink.borrow_mut().push(name.clone()),
            ObserveOptions::new(),
        )
        .unwrap();

    ann.set("name", "Ann").unwrap();
    book.set("selected", bo.clone()).unwrap();
    ann.set("name", "ignored").unwrap();
    bo.set("name", "Bo").unwrap();
    book.set("selected", Value::None).unwrap();
    info!(shown = shown.borrow().len(), "selection scenario done");

    assert_eq!(
        *shown.borrow(),
        vec![
            Value::from("Ann"),
            Value::from("bo"),
            Value::from("Bo"),
            Value::None
        ]
    );
    assert!(runtime.unregister(handle));
    assert!(runtime.table().is_empty());
}

#[test]
fn rejected_edits_do_not_notify() {
    init_tracing();
    let runtime = Runtime::default();
    let (book, ann) = (book(), contact("ann", 30));
    book.facet_list("contacts").unwrap().append(Value::from(ann.clone())).unwrap();

    let events = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&events);
    let _handle = runtime
        .observe(
            &book,
            "contacts:[name, age]",
            move || *sink.borrow_mut() += 1,
            ObserveOptions::new(),
        )
        .unwrap();

    assert!(matches!(ann.set("age", 200), Err(FacetError::Validation { .. })));
    assert!(book.set("selected", Value::from(3)).is_err());
    assert_eq!(*events.borrow(), 0);
    ann.set("age", 31).unwrap();
    assert_eq!(*events.borrow(), 1);
}

#[test]
fn index_entries_are_tracked_by_key() {
    init_tracing();
    let runtime = Runtime::default();
    let (book, ann, bo) = (book(), contact("ann", 30), contact("bo", 41));
    let index = book.facet_dict("index").unwrap();
    index.insert(Value::from("a"), Value::from(ann.clone())).unwrap();

    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _handle = runtime
        .observe(
            &book,
            "index:tags[]",
            move |change: &Change| {
                if let ChangeEvent::Set(diff) = &change.event {
                    for tag in &diff.added {
                        sink.borrow_mut().push(tag.as_str().unwrap_or("?").to_string());
                    }
                }
            },
            ObserveOptions::new(),
        )
        .unwrap();

    ann.facet_set("tags").unwrap().add(Value::from("friend")).unwrap();
    index.insert(Value::from("a"), Value::from(bo.clone())).unwrap();
    ann.facet_set("tags").unwrap().add(Value::from("stale")).unwrap();
    bo.facet_set("tags").unwrap().add(Value::from("work")).unwrap();

    assert_eq!(*seen.borrow(), ["friend", "work"]);
}

#[test]
fn mirrored_names_and_deferred_dispatch() {
    init_tracing();
    let runtime = Runtime::default();
    let (ann, copy) = (contact("ann", 30), contact("", 0));
    let sync = runtime.sync_attribute(&ann, "name", &copy, "name", true).unwrap();
    assert_eq!(copy.get("name").unwrap(), Value::from("ann"));

    let later = Rc::new(TaskQueue::new());
    runtime.register_dispatcher("later", later.clone());
    let log = Rc::new(RefCell::new(Vec::new()));
    let (now, queued) = (Rc::clone(&log), Rc::clone(&log));
    let _sync_view = runtime
        .observe(&copy, "name", move || now.borrow_mut().push("same"), ObserveOptions::new())
        .unwrap();
    let _async_view = runtime
        .observe(
            &copy,
            "name",
            move || queued.borrow_mut().push("later"),
            ObserveOptions::new().dispatch("later"),
        )
        .unwrap();

    ann.set("name", "Ann").unwrap();
    assert_eq!(copy.get("name").unwrap(), Value::from("Ann"));
    assert_eq!(*log.borrow(), ["same"]);
    assert_eq!(later.run_pending(), 1);
    assert_eq!(*log.borrow(), ["same", "later"]);

    copy.set("name", "Annie").unwrap();
    assert_eq!(ann.get("name").unwrap(), Value::from("Annie"));
    assert!(runtime.unsync(sync));
    assert_eq!(runtime.pending(), 0);
}
