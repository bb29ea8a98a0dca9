//! Whole-graph invariant audit.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::acl;
use crate::error::Result;
use crate::keys::VertexKey;
use crate::model::{Permission, VertexId};
use crate::store::StoreTxn;
use crate::types::NodeId;

use super::options::GraphOptions;
use super::tables;
use super::traversal::traverse;
use super::GestaltGraph;

/// Result of a full-graph audit. Every counter other than the first
/// three is a class of violation; a clean graph has them all at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Vertices present in the adjacency table.
    pub vertices: u64,
    /// Directed adjacency entries (twice the undirected edge count on
    /// a healthy graph).
    pub directed_edges: u64,
    /// Connected components found.
    pub components: u64,
    /// Edges present on one side only, or pointing at a vertex with
    /// no adjacency entry.
    pub asymmetric_edges: u64,
    /// Vertices with no metadata record.
    pub missing_metadata: u64,
    /// Node vertices that do not resolve to a permission record.
    pub missing_permissions: u64,
    /// Components whose nodes hold value-divergent permissions.
    pub divergent_components: u64,
    /// Permission records whose stored refcount disagrees with the
    /// references actually pointing at them, plus references to
    /// records that do not exist.
    pub refcount_mismatches: u64,
    /// Permission records nothing references.
    pub orphan_permissions: u64,
    /// Permission references for nodes absent from the graph.
    pub stray_refs: u64,
}

impl IntegrityReport {
    /// True when no violation of any class was found.
    pub fn is_clean(&self) -> bool {
        self.asymmetric_edges == 0
            && self.missing_metadata == 0
            && self.missing_permissions == 0
            && self.divergent_components == 0
            && self.refcount_mismatches == 0
            && self.orphan_permissions == 0
            && self.stray_refs == 0
    }
}

impl GestaltGraph {
    /// Audits the whole graph and permission store in one read
    /// transaction: edge symmetry, metadata presence, component
    /// permission agreement, and refcount accuracy.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.ensure_running()?;
        self.with_txn(|txn| self.check_integrity_with_txn(txn))
    }

    /// Transaction-scoped form of
    /// [`check_integrity`](Self::check_integrity).
    pub fn check_integrity_with_txn(&self, txn: &mut StoreTxn<'_>) -> Result<IntegrityReport> {
        self.ensure_running()?;
        let mut report = IntegrityReport::default();
        let all = tables::all_matrix_keys(txn)?;

        for vertex in &all {
            let Some(neighbors) = tables::get_neighbors(txn, vertex)? else {
                continue;
            };
            report.vertices += 1;
            report.directed_edges += neighbors.len() as u64;
            let id = vertex.decode()?;
            let has_meta = match &id {
                VertexId::Node(_) => tables::get_node_info(txn, vertex)?.is_some(),
                VertexId::Identity(..) => tables::get_identity_info(txn, vertex)?.is_some(),
            };
            if !has_meta {
                report.missing_metadata += 1;
            }
            for neighbor in &neighbors {
                let back = tables::get_neighbors(txn, &neighbor.to_key()?)?;
                match back {
                    Some(set) if set.contains(&id) => {}
                    _ => report.asymmetric_edges += 1,
                }
            }
        }

        // Audit traversals must not abort on the asymmetries counted
        // above, and must not cap component size.
        let audit_options = GraphOptions {
            strict_traversal: false,
            max_gestalt_size: None,
        };
        let mut visited: BTreeSet<VertexKey> = BTreeSet::new();
        let mut graph_nodes: FxHashSet<NodeId> = FxHashSet::default();
        for vertex in all {
            if visited.contains(&vertex) {
                continue;
            }
            let component = traverse(txn, vec![vertex], &visited, &audit_options)?;
            self.metrics.record_traversal(component.len());
            if component.is_empty() {
                continue;
            }
            report.components += 1;
            visited.extend(component.matrix.keys().cloned());
            let mut perms: Vec<Permission> = Vec::new();
            for node in &component.nodes {
                graph_nodes.insert(node.clone());
                match acl::get_ref(txn, node)? {
                    None => report.missing_permissions += 1,
                    Some(perm_id) => match acl::get_record(txn, perm_id)? {
                        None => report.missing_permissions += 1,
                        Some(record) => perms.push(record.perm),
                    },
                }
            }
            if perms.windows(2).any(|pair| pair[0] != pair[1]) {
                report.divergent_components += 1;
            }
        }

        let refs = acl::all_refs(txn)?;
        let records = acl::all_records(txn)?;
        let mut actual_counts: FxHashMap<u64, u32> = FxHashMap::default();
        let record_ids: FxHashSet<u64> = records.iter().map(|(id, _)| *id).collect();
        for (node, perm_id) in &refs {
            *actual_counts.entry(*perm_id).or_default() += 1;
            if !graph_nodes.contains(node) {
                report.stray_refs += 1;
            }
            if !record_ids.contains(perm_id) {
                report.refcount_mismatches += 1;
            }
        }
        for (perm_id, record) in &records {
            match actual_counts.get(perm_id).copied().unwrap_or(0) {
                0 => report.orphan_permissions += 1,
                actual if actual != record.count => report.refcount_mismatches += 1,
                _ => {}
            }
        }
        Ok(report)
    }
}
