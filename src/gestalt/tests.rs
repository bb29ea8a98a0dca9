use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::GestaltError;
use crate::model::{IdentityInfo, NodeInfo, VertexId};
use crate::store::Store;
use crate::types::{GestaltAction, NodeId};

use super::tables;
use super::traversal::traverse;
use super::{GestaltGraph, GraphOptions, LifecycleState};

fn engine() -> GestaltGraph {
    let graph = GestaltGraph::new(Arc::new(Store::new()), GraphOptions::default());
    graph.start().unwrap();
    graph
}

#[test]
fn start_is_required_and_single_shot() {
    let graph = GestaltGraph::new(Arc::new(Store::new()), GraphOptions::default());
    assert!(matches!(
        graph.set_node(&NodeInfo::new("a")),
        Err(GestaltError::Lifecycle {
            actual: LifecycleState::Uninitialized,
            ..
        })
    ));
    graph.start().unwrap();
    assert!(graph.start().is_err());
    graph.set_node(&NodeInfo::new("a")).unwrap();
}

#[test]
fn new_node_gets_fresh_empty_permission() {
    let graph = engine();
    graph.set_node(&NodeInfo::new("a")).unwrap();
    let actions = graph
        .get_gestalt_actions_by_node(&NodeId::from("a"))
        .unwrap();
    assert!(actions.is_empty());
    assert!(graph.check_integrity().unwrap().is_clean());
}

#[test]
fn set_node_is_idempotent_for_permissions() {
    let graph = engine();
    graph.set_node(&NodeInfo::new("a")).unwrap();
    graph
        .set_gestalt_action_by_node(&NodeId::from("a"), GestaltAction::Notify)
        .unwrap();
    // Re-upserting must not reset the permission.
    graph.set_node(&NodeInfo::new("a")).unwrap();
    let actions = graph
        .get_gestalt_actions_by_node(&NodeId::from("a"))
        .unwrap();
    assert!(actions.contains(&GestaltAction::Notify));
}

#[test]
fn action_query_on_missing_node_fails() {
    let graph = engine();
    assert!(matches!(
        graph.get_gestalt_actions_by_node(&NodeId::from("ghost")),
        Err(GestaltError::NotFound("node"))
    ));
}

#[test]
fn isolated_identity_has_no_addressable_permission() {
    let graph = engine();
    graph
        .set_identity(&IdentityInfo::new("provider", "alice"))
        .unwrap();
    assert!(matches!(
        graph.get_gestalt_actions_by_identity(&"provider".into(), &"alice".into()),
        Err(GestaltError::NotFound("identity anchor node"))
    ));
}

#[test]
fn identity_anchor_is_smallest_node_id() {
    let graph = engine();
    let identity = IdentityInfo::new("provider", "alice");
    graph
        .link_node_and_identity(&NodeInfo::new("zz"), &identity)
        .unwrap();
    graph
        .link_node_and_identity(&NodeInfo::new("aa"), &identity)
        .unwrap();
    // Both nodes share one permission; granting through the identity
    // must reach it through the smallest node id without erroring.
    graph
        .set_gestalt_action_by_identity(&"provider".into(), &"alice".into(), GestaltAction::Scan)
        .unwrap();
    for node in ["aa", "zz"] {
        let actions = graph
            .get_gestalt_actions_by_node(&NodeId::from(node))
            .unwrap();
        assert!(actions.contains(&GestaltAction::Scan), "node {node}");
    }
}

#[test]
fn traversal_treats_vanished_neighbor_as_branch_end() {
    let store = Store::new();

    // Hand-craft a dangling edge: "a" lists "ghost", which has no
    // adjacency entry at all.
    let key_a = VertexId::Node(NodeId::from("a")).to_key().unwrap();
    let ghost = VertexId::Node(NodeId::from("ghost"));
    let mut txn = store.begin();
    let set: BTreeSet<VertexId> = [ghost].into_iter().collect();
    tables::put_neighbors(&mut txn, &key_a, &set).unwrap();
    let component = traverse(
        &mut txn,
        vec![key_a.clone()],
        &BTreeSet::new(),
        &GraphOptions::default(),
    )
    .unwrap();
    txn.rollback();
    assert_eq!(component.len(), 1);
    assert!(component.contains(&key_a));
}

#[test]
fn strict_traversal_detects_asymmetric_edge() {
    let store = Arc::new(Store::new());

    // "a" lists "b", but "b" exists with an empty neighbor set.
    let key_a = VertexId::Node(NodeId::from("a")).to_key().unwrap();
    let key_b = VertexId::Node(NodeId::from("b")).to_key().unwrap();
    let mut txn = store.begin();
    let set: BTreeSet<VertexId> = [VertexId::Node(NodeId::from("b"))].into_iter().collect();
    tables::put_neighbors(&mut txn, &key_a, &set).unwrap();
    tables::put_neighbors(&mut txn, &key_b, &BTreeSet::new()).unwrap();
    let result = traverse(
        &mut txn,
        vec![key_a],
        &BTreeSet::new(),
        &GraphOptions::strict(),
    );
    txn.rollback();
    assert!(matches!(result, Err(GestaltError::Corruption(_))));
}

#[test]
fn traversal_respects_size_limit() {
    let store = Arc::new(Store::new());
    let options = GraphOptions {
        strict_traversal: false,
        max_gestalt_size: Some(2),
    };
    let graph = GestaltGraph::new(store.clone(), options);
    graph.start().unwrap();
    graph
        .link_node_and_node(&NodeInfo::new("a"), &NodeInfo::new("b"))
        .unwrap();
    graph
        .link_node_and_node(&NodeInfo::new("b"), &NodeInfo::new("c"))
        .unwrap();

    assert!(matches!(
        graph.get_gestalt_by_node(&NodeId::from("a")),
        Err(GestaltError::LimitExceeded(2))
    ));
}

#[test]
fn metrics_count_links_merges_and_splits() {
    let graph = engine();
    graph
        .link_node_and_node(&NodeInfo::new("a"), &NodeInfo::new("b"))
        .unwrap();
    graph.set_node(&NodeInfo::new("c")).unwrap();
    graph
        .link_node_and_node(&NodeInfo::new("b"), &NodeInfo::new("c"))
        .unwrap();
    graph
        .unlink_node_and_node(&NodeId::from("a"), &NodeId::from("b"))
        .unwrap();

    let snapshot = graph.metrics();
    assert_eq!(snapshot.links, 2);
    assert_eq!(snapshot.merges, 1);
    assert_eq!(snapshot.unlinks, 1);
    assert_eq!(snapshot.splits, 1);
    assert!(snapshot.traversal_visits > 0);
}

#[test]
fn destroy_requires_stop_and_wipes_all_tables() {
    let store = Arc::new(Store::new());
    let graph = GestaltGraph::new(store.clone(), GraphOptions::default());
    graph.start().unwrap();
    graph
        .link_node_and_node(&NodeInfo::new("a"), &NodeInfo::new("b"))
        .unwrap();

    assert!(graph.destroy().is_err());
    graph.stop().unwrap();
    graph.destroy().unwrap();
    assert_eq!(graph.state(), LifecycleState::Destroyed);
    assert!(graph.start().is_err());

    let mut txn = store.begin();
    assert!(txn.scan_prefix(&[]).unwrap().is_empty());
    txn.rollback();
}
