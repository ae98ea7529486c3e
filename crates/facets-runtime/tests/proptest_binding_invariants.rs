#![forbid(unsafe_code)]

//! Property-based invariant tests for the binding runtime.
//!
//! 1. The bindings a subscription holds after any sequence of graph edits
//!    equal the bindings a fresh subscription computes for the edited graph.
//! 2. This holds for repeating patterns over cyclic graphs too: a cycle
//!    the root stops reaching is released.
//! 3. Unregistering removes every binding, notifier and facet-added hook.

use std::collections::BTreeSet;

use facets_core::{FacetDecl, ListSpec, Object, Value};
use facets_runtime::{ObserveOptions, Runtime, SubscriptionId};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

const NODES: usize = 5;

const ACYCLIC: &[&str] = &[
    "next.value",
    "next:next.value",
    "children.value",
    "children:next:value",
    "next.children.[value, next]",
    "[next, children].value, x+tracked",
];

const CYCLIC: &[&str] = &["next*.value", "children*.value", "[next, children]*.value"];

#[derive(Debug, Clone)]
enum GraphOp {
    Link(usize, Option<usize>),
    Append(usize, usize),
    DropFirst(usize),
    Replace(usize, Vec<usize>),
    Touch(usize, i64),
    Declare(usize, bool),
}

fn graph_op() -> impl Strategy<Value = GraphOp> {
    let index = 0..NODES;
    prop_oneof![
        3 => (index.clone(), proptest::option::of(0..NODES)).prop_map(|(i, j)| GraphOp::Link(i, j)),
        3 => (index.clone(), 0..NODES).prop_map(|(i, j)| GraphOp::Append(i, j)),
        2 => index.clone().prop_map(GraphOp::DropFirst),
        1 => (index.clone(), proptest::collection::vec(0..NODES, 0..3))
            .prop_map(|(i, items)| GraphOp::Replace(i, items)),
        1 => (index.clone(), 0i64..4).prop_map(|(i, v)| GraphOp::Touch(i, v)),
        1 => (index, any::<bool>()).prop_map(|(i, tracked)| GraphOp::Declare(i, tracked)),
    ]
}

fn graph() -> Vec<Object> {
    (0..NODES)
        .map(|_| {
            Object::builder("Node")
                .facet("value", FacetDecl::simple(0))
                .facet("next", FacetDecl::any())
                .facet("children", FacetDecl::list(ListSpec::new()))
                .build()
        })
        .collect()
}

fn apply(nodes: &[Object], op: &GraphOp, declared: &mut usize) {
    let node = |i: usize| Value::from(nodes[i].clone());
    match op {
        GraphOp::Link(i, j) => nodes[*i].set("next", j.map(node)).unwrap(),
        GraphOp::Append(i, j) => nodes[*i]
            .facet_list("children")
            .unwrap()
            .append(node(*j))
            .unwrap(),
        GraphOp::DropFirst(i) => {
            let children = nodes[*i].facet_list("children").unwrap();
            if !children.is_empty() {
                children.delete(0).unwrap();
            }
        }
        GraphOp::Replace(i, items) => nodes[*i]
            .set("children", Value::list(items.iter().map(|j| node(*j))))
            .unwrap(),
        GraphOp::Touch(i, v) => nodes[*i].set("value", *v).unwrap(),
        GraphOp::Declare(i, tracked) => {
            let decl = FacetDecl::simple(0);
            let decl = if *tracked { decl.meta("tracked", true) } else { decl };
            nodes[*i].add_facet(format!("x{declared}"), decl).unwrap();
            *declared += 1;
        }
    }
}

type Snapshot = BTreeSet<(usize, String, Vec<String>)>;

/// Bindings of `sub`, keyed by node index in `nodes`.
fn snapshot(runtime: &Runtime, nodes: &[Object], sub: SubscriptionId) -> Snapshot {
    let mut out = BTreeSet::new();
    for (index, node) in nodes.iter().enumerate() {
        for info in runtime.bindings_for(node) {
            if info.subscription != sub {
                continue;
            }
            let mut names: Vec<String> =
                info.attributes.iter().map(|(name, _)| name.to_string()).collect();
            names.sort();
            out.insert((index, info.node.to_string(), names));
        }
    }
    out
}

fn fresh(runtime: &Runtime, nodes: &[Object], pattern: &str) -> Snapshot {
    let handle = runtime
        .observe(&nodes[0], pattern, || {}, ObserveOptions::new())
        .unwrap();
    let snap = snapshot(runtime, nodes, handle.id());
    runtime.unregister(handle);
    snap
}

fn assert_clean(nodes: &[Object]) -> Result<(), TestCaseError> {
    for node in nodes {
        prop_assert_eq!(node.notifier_count(), 0);
        prop_assert_eq!(node.facet_added_hook_count(), 0);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn incremental_bindings_match_fresh_bindings(
        pattern in proptest::sample::select(ACYCLIC),
        ops in proptest::collection::vec(graph_op(), 1..25),
    ) {
        let runtime = Runtime::default();
        let nodes = graph();
        let handle = runtime
            .observe(&nodes[0], pattern, || {}, ObserveOptions::new())
            .unwrap();

        let mut declared = 0;
        for op in &ops {
            apply(&nodes, op, &mut declared);
            let live = snapshot(&runtime, &nodes, handle.id());
            prop_assert_eq!(live, fresh(&runtime, &nodes, pattern), "after {:?}", op);
        }

        prop_assert!(runtime.unregister(handle));
        prop_assert!(runtime.table().is_empty());
        assert_clean(&nodes)?;
    }

    #[test]
    fn repeating_patterns_bind_exactly_what_is_reachable(
        pattern in proptest::sample::select(CYCLIC),
        ops in proptest::collection::vec(graph_op(), 1..25),
    ) {
        let runtime = Runtime::default();
        let nodes = graph();
        let handle = runtime
            .observe(&nodes[0], pattern, || {}, ObserveOptions::new().notify(false))
            .unwrap();

        let mut declared = 0;
        for op in &ops {
            apply(&nodes, op, &mut declared);
            let live = snapshot(&runtime, &nodes, handle.id());
            prop_assert_eq!(live, fresh(&runtime, &nodes, pattern), "after {:?}", op);
        }

        prop_assert!(runtime.unregister(handle));
        prop_assert!(runtime.table().is_empty());
        assert_clean(&nodes)?;
    }
}
