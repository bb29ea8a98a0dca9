use std::sync::Arc;

use gestalt::{
    GestaltAction, GestaltError, GestaltGraph, GraphOptions, LifecycleState, NodeId, NodeInfo,
    Result, Store, StoreError,
};

fn node(id: &str) -> NodeInfo {
    NodeInfo::new(id)
}

#[test]
fn operations_require_a_running_engine() {
    let graph = GestaltGraph::new(Arc::new(Store::new()), GraphOptions::default());
    assert!(matches!(
        graph.get_gestalts(),
        Err(GestaltError::Lifecycle {
            expected: LifecycleState::Running,
            actual: LifecycleState::Uninitialized,
        })
    ));

    graph.start().unwrap();
    graph.set_node(&node("a")).unwrap();
    graph.stop().unwrap();

    assert!(matches!(
        graph.set_node(&node("b")),
        Err(GestaltError::Lifecycle { .. })
    ));
}

#[test]
fn restart_resumes_over_existing_data() -> Result<()> {
    let store = Arc::new(Store::new());
    let graph = GestaltGraph::new(store.clone(), GraphOptions::default());
    graph.start()?;
    graph.link_node_and_node(&node("a"), &node("b"))?;
    graph.set_gestalt_action_by_node(&NodeId::from("a"), GestaltAction::Notify)?;
    graph.stop()?;

    // A second engine over the same store sees everything.
    let resumed = GestaltGraph::new(store, GraphOptions::default());
    resumed.start()?;
    let actions = resumed.get_gestalt_actions_by_node(&NodeId::from("b"))?;
    assert!(actions.contains(&GestaltAction::Notify));
    assert!(resumed.check_integrity()?.is_clean());
    Ok(())
}

#[test]
fn destroy_is_terminal_and_leaves_no_keys() -> Result<()> {
    let store = Arc::new(Store::new());
    let graph = GestaltGraph::new(store.clone(), GraphOptions::default());
    graph.start()?;
    graph.link_node_and_node(&node("a"), &node("b"))?;

    assert!(matches!(
        graph.destroy(),
        Err(GestaltError::Lifecycle {
            expected: LifecycleState::Uninitialized,
            actual: LifecycleState::Running,
        })
    ));
    graph.stop()?;
    graph.destroy()?;
    assert_eq!(graph.state(), LifecycleState::Destroyed);
    assert!(graph.start().is_err());
    assert!(matches!(
        graph.get_gestalts(),
        Err(GestaltError::Lifecycle { .. })
    ));

    let mut txn = store.begin();
    assert!(txn.scan_prefix(&[]).unwrap().is_empty());
    txn.rollback();
    Ok(())
}

#[test]
fn conflicting_links_serialize_through_retry() -> Result<()> {
    let store = Arc::new(Store::new());
    let graph = GestaltGraph::new(store.clone(), GraphOptions::default());
    graph.start()?;
    graph.set_node(&node("a"))?;

    // Two transactions race to extend a's component.
    let mut t1 = store.begin();
    let mut t2 = store.begin();
    graph.link_node_and_node_with_txn(&mut t1, &node("a"), &node("b"))?;
    graph.link_node_and_node_with_txn(&mut t2, &node("a"), &node("c"))?;

    t1.commit().expect("first committer wins");
    assert!(matches!(t2.commit(), Err(StoreError::Conflict(_))));

    // The loser retries on a fresh transaction and lands cleanly.
    graph.link_node_and_node(&node("a"), &node("c"))?;

    let gestalt = graph
        .get_gestalt_by_node(&NodeId::from("a"))?
        .expect("gestalt exists");
    assert_eq!(gestalt.len(), 3);
    assert!(graph.check_integrity()?.is_clean());
    Ok(())
}

#[test]
fn uncommitted_operations_are_invisible() -> Result<()> {
    let store = Arc::new(Store::new());
    let graph = GestaltGraph::new(store.clone(), GraphOptions::default());
    graph.start()?;

    let mut txn = store.begin();
    graph.set_node_with_txn(&mut txn, &node("pending"))?;
    // Dropped without commit: nothing lands.
    txn.rollback();

    assert!(graph.get_node(&NodeId::from("pending"))?.is_none());
    Ok(())
}
