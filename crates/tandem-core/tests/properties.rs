//! Property-based tests for snapshots over generated graphs.
//!
//! For any graph reachable from a root:
//!  - Round-trip: applying its snapshot to an empty replica rebuilds an
//!    equal graph, and every object resolves under the same id
//!  - Repeatability: two snapshots of an unchanged graph rebuild equal graphs

use proptest::prelude::*;
use std::sync::Arc;
use tandem_core::{Command, Replicator, Topology};
use tandem_model::{structurally_equal, Graph, NodeTemplate, ObjectKey, Scalar, TypeRegistry};

struct Silent;

impl Topology for Silent {
    fn send_commands(&self, _commands: Vec<Command>) {}
}

#[derive(Clone, Debug)]
enum Edit {
    Label(usize, i64),
    Name(usize, String),
    Link(usize, usize),
    PushInt(usize, i64),
    PushRef(usize, usize),
    Tag(usize, u8),
    TagRef(usize, usize),
    Attr(usize, u8, usize),
}

fn types() -> TypeRegistry {
    TypeRegistry::new().with(
        NodeTemplate::new("Item")
            .value("label", 0)
            .value("name", Scalar::Null)
            .value("link", Scalar::Null)
            .list("items")
            .set("tags")
            .map("attrs"),
    )
}

fn edit_strategy(nodes: usize) -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..nodes, any::<i64>()).prop_map(|(n, v)| Edit::Label(n, v)),
        (0..nodes, "[a-z]{0,6}").prop_map(|(n, s)| Edit::Name(n, s)),
        (0..nodes, 0..nodes).prop_map(|(a, b)| Edit::Link(a, b)),
        (0..nodes, any::<i64>()).prop_map(|(n, v)| Edit::PushInt(n, v)),
        (0..nodes, 0..nodes).prop_map(|(a, b)| Edit::PushRef(a, b)),
        (0..nodes, any::<u8>()).prop_map(|(n, t)| Edit::Tag(n, t)),
        (0..nodes, 0..nodes).prop_map(|(a, b)| Edit::TagRef(a, b)),
        (0..nodes, any::<u8>(), 0..nodes).prop_map(|(a, k, b)| Edit::Attr(a, k, b)),
    ]
}

fn graph_strategy() -> impl Strategy<Value = (usize, Vec<Edit>)> {
    (1usize..8).prop_flat_map(|nodes| {
        (
            Just(nodes),
            prop::collection::vec(edit_strategy(nodes), 0..40),
        )
    })
}

fn build(nodes: usize, edits: &[Edit]) -> (Graph, ObjectKey) {
    let types = types();
    let mut graph = Graph::new();
    let keys: Vec<ObjectKey> = (0..nodes)
        .map(|_| graph.create(&types, "Item").unwrap())
        .collect();

    for edit in edits {
        match edit {
            Edit::Label(n, v) => {
                graph.set_property(keys[*n], "label", *v).unwrap();
            }
            Edit::Name(n, s) => {
                graph.set_property(keys[*n], "name", s.as_str()).unwrap();
            }
            Edit::Link(a, b) => {
                graph.set_property(keys[*a], "link", keys[*b]).unwrap();
            }
            Edit::PushInt(n, v) => {
                let items = graph.container(keys[*n], "items").unwrap();
                graph.list_push(items, *v).unwrap();
            }
            Edit::PushRef(a, b) => {
                let items = graph.container(keys[*a], "items").unwrap();
                graph.list_push(items, keys[*b]).unwrap();
            }
            Edit::Tag(n, t) => {
                let tags = graph.container(keys[*n], "tags").unwrap();
                graph.set_insert(tags, i64::from(*t)).unwrap();
            }
            Edit::TagRef(a, b) => {
                let tags = graph.container(keys[*a], "tags").unwrap();
                graph.set_insert(tags, keys[*b]).unwrap();
            }
            Edit::Attr(a, k, b) => {
                let attrs = graph.container(keys[*a], "attrs").unwrap();
                graph.map_insert(attrs, i64::from(*k), keys[*b]).unwrap();
            }
        }
    }
    (graph, keys[0])
}

fn replicator(graph: &tandem_model::SharedGraph) -> Replicator {
    Replicator::new(graph.clone(), Arc::new(types()), Arc::new(Silent))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn snapshot_round_trip((nodes, edits) in graph_strategy()) {
        let (graph, root) = build(nodes, &edits);
        let source_graph = graph.shared();
        let source = replicator(&source_graph);
        source.register_root(root).unwrap();
        let snapshot = source.snapshot().unwrap();

        let target_graph = Graph::new().shared();
        let target = replicator(&target_graph);
        target.execute(snapshot).unwrap();
        let target_root = target.root().unwrap();

        let left = source_graph.lock();
        let right = target_graph.lock();
        prop_assert!(structurally_equal(&left, root, &right, target_root));
        for key in left.reachable_from(root) {
            let id = source.id_of(key).unwrap();
            prop_assert!(target.object_for(&right, id).is_some());
        }
        prop_assert_eq!(source.id_of(root), target.id_of(target_root));
    }

    #[test]
    fn snapshot_is_repeatable((nodes, edits) in graph_strategy()) {
        let (graph, root) = build(nodes, &edits);
        let source_graph = graph.shared();
        let source = replicator(&source_graph);
        source.register_root(root).unwrap();
        let first = source.snapshot().unwrap();
        let second = source.snapshot().unwrap();

        let a_graph = Graph::new().shared();
        let a = replicator(&a_graph);
        a.execute(first).unwrap();
        let b_graph = Graph::new().shared();
        let b = replicator(&b_graph);
        b.execute(second).unwrap();

        let (a_root, b_root) = (a.root().unwrap(), b.root().unwrap());
        let left = a_graph.lock();
        let right = b_graph.lock();
        prop_assert!(structurally_equal(&left, a_root, &right, b_root));
    }
}
