use std::sync::Arc;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use gestalt::{
    GestaltAction, GestaltError, GestaltGraph, GraphOptions, IdentityId, IdentityInfo, NodeId,
    NodeInfo, ProviderId, Result, Store,
};

const ACTIONS: [GestaltAction; 3] = [
    GestaltAction::Notify,
    GestaltAction::Scan,
    GestaltAction::Claim,
];

#[test]
fn randomized_link_unlink_storm_keeps_invariants() -> Result<()> {
    let graph = GestaltGraph::new(Arc::new(Store::new()), GraphOptions::default());
    graph.start()?;

    let mut rng = ChaCha8Rng::seed_from_u64(0x6E57A17);
    let nodes: Vec<NodeId> = (0..12).map(|i| NodeId(format!("node-{i:02}"))).collect();
    let identities: Vec<(ProviderId, IdentityId)> = (0..4)
        .map(|i| {
            (
                ProviderId::from("provider"),
                IdentityId(format!("user-{i}")),
            )
        })
        .collect();

    for step in 0..400 {
        let roll = rng.gen_range(0..100);
        if roll < 30 {
            let a = nodes.choose(&mut rng).unwrap();
            let b = nodes.choose(&mut rng).unwrap();
            if a != b {
                graph.link_node_and_node(&NodeInfo::new(a.as_str()), &NodeInfo::new(b.as_str()))?;
            }
        } else if roll < 45 {
            let n = nodes.choose(&mut rng).unwrap();
            let (provider, identity) = identities.choose(&mut rng).unwrap();
            graph.link_node_and_identity(
                &NodeInfo::new(n.as_str()),
                &IdentityInfo::new(provider.as_str(), identity.as_str()),
            )?;
        } else if roll < 70 {
            let a = nodes.choose(&mut rng).unwrap();
            let b = nodes.choose(&mut rng).unwrap();
            if a != b {
                graph.unlink_node_and_node(a, b)?;
            }
        } else if roll < 80 {
            let n = nodes.choose(&mut rng).unwrap();
            let (provider, identity) = identities.choose(&mut rng).unwrap();
            graph.unlink_node_and_identity(n, provider, identity)?;
        } else if roll < 88 {
            let n = nodes.choose(&mut rng).unwrap();
            let action = *ACTIONS.choose(&mut rng).unwrap();
            match graph.set_gestalt_action_by_node(n, action) {
                Ok(()) | Err(GestaltError::NotFound(_)) => {}
                Err(other) => panic!("unexpected error at step {step}: {other}"),
            }
        } else if roll < 94 {
            let n = nodes.choose(&mut rng).unwrap();
            let action = *ACTIONS.choose(&mut rng).unwrap();
            match graph.unset_gestalt_action_by_node(n, action) {
                Ok(()) | Err(GestaltError::NotFound(_)) => {}
                Err(other) => panic!("unexpected error at step {step}: {other}"),
            }
        } else {
            let n = nodes.choose(&mut rng).unwrap();
            graph.unset_node(n)?;
        }

        if step % 25 == 0 {
            let report = graph.check_integrity()?;
            assert!(report.is_clean(), "integrity at step {step}: {report:?}");
        }
    }

    let report = graph.check_integrity()?;
    assert!(report.is_clean(), "final integrity: {report:?}");

    // Permission uniqueness: all nodes of one gestalt agree.
    for gestalt in graph.get_gestalts()? {
        let mut action_sets = Vec::new();
        for info in gestalt.nodes.values() {
            action_sets.push(graph.get_gestalt_actions_by_node(&info.id)?);
        }
        for pair in action_sets.windows(2) {
            assert_eq!(pair[0], pair[1], "divergent permissions inside one gestalt");
        }
    }
    Ok(())
}
