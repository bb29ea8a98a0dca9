//! Component traversal: breadth-first walk over the adjacency table.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rustc_hash::FxHashMap;

use crate::error::{corruption, GestaltError, Result};
use crate::keys::VertexKey;
use crate::model::VertexId;
use crate::store::StoreTxn;
use crate::types::{IdentityId, NodeId, ProviderId};

use super::options::GraphOptions;
use super::tables;

/// The raw result of one traversal: the visited adjacency sub-map and
/// the visited vertices partitioned by kind.
#[derive(Debug, Default)]
pub(crate) struct Component {
    /// Adjacency of every visited vertex, keyed by vertex key.
    pub matrix: BTreeMap<VertexKey, BTreeSet<VertexId>>,
    /// Node members, in visit order.
    pub nodes: Vec<NodeId>,
    /// Identity members, in visit order.
    pub identities: Vec<(ProviderId, IdentityId)>,
}

impl Component {
    pub fn contains(&self, vertex: &VertexKey) -> bool {
        self.matrix.contains_key(vertex)
    }

    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }
}

/// Walks the connected component reachable from `seeds`, skipping
/// anything in `already` (vertices whose component was produced by an
/// earlier traversal of the same decomposition).
///
/// A vertex that has vanished mid-walk — listed as a neighbor but
/// absent from the adjacency table — ends that branch silently; the
/// transaction snapshot makes this benign. The visited-set membership
/// test keeps the walk terminating and each vertex visited once.
pub(crate) fn traverse(
    txn: &mut StoreTxn<'_>,
    seeds: Vec<VertexKey>,
    already: &BTreeSet<VertexKey>,
    options: &GraphOptions,
) -> Result<Component> {
    let mut component = Component::default();
    let mut queue: VecDeque<VertexKey> = seeds.into();
    // Origins that listed a not-yet-visited vertex; used under strict
    // traversal to confirm the back edge once that vertex is loaded.
    let mut expected_back: FxHashMap<VertexKey, Vec<VertexId>> = FxHashMap::default();

    while let Some(vertex) = queue.pop_front() {
        if component.contains(&vertex) || already.contains(&vertex) {
            continue;
        }
        let Some(neighbors) = tables::get_neighbors(txn, &vertex)? else {
            continue;
        };
        if options.strict_traversal {
            for origin in expected_back.remove(&vertex).unwrap_or_default() {
                if !neighbors.contains(&origin) {
                    return Err(corruption(format!(
                        "asymmetric edge: {vertex} does not list its origin vertex"
                    )));
                }
            }
        }
        if let Some(max) = options.max_gestalt_size {
            if component.len() + 1 > max {
                return Err(GestaltError::LimitExceeded(max));
            }
        }
        let id = vertex.decode()?;
        match &id {
            VertexId::Node(node) => component.nodes.push(node.clone()),
            VertexId::Identity(provider, identity) => component
                .identities
                .push((provider.clone(), identity.clone())),
        }
        for neighbor in &neighbors {
            let neighbor_key = neighbor.to_key()?;
            if let Some(back) = component.matrix.get(&neighbor_key) {
                // Neighbor already loaded; its set must reciprocate.
                if options.strict_traversal && !back.contains(&id) {
                    return Err(corruption(format!(
                        "asymmetric edge: {neighbor_key} does not list {vertex}"
                    )));
                }
            } else if !already.contains(&neighbor_key) {
                if options.strict_traversal {
                    expected_back
                        .entry(neighbor_key.clone())
                        .or_default()
                        .push(id.clone());
                }
                queue.push_back(neighbor_key);
            }
        }
        component.matrix.insert(vertex, neighbors);
    }
    Ok(component)
}
