//! Edge lifecycle: linking merges permissions, unlinking detects
//! splits and clones them.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::acl;
use crate::error::{corruption, GestaltError, Result};
use crate::keys::VertexKey;
use crate::model::{IdentityInfo, NodeInfo, Permission, VertexId};
use crate::store::StoreTxn;
use crate::types::{IdentityId, NodeId, ProviderId};

use super::metrics::GraphMetrics;
use super::tables;
use super::traversal::traverse;
use super::GestaltGraph;

impl GestaltGraph {
    /// Links two node vertices, creating either as needed.
    ///
    /// Linking is idempotent: an existing edge only refreshes both
    /// vertices' metadata. When the edge bridges two components their
    /// permissions are unioned and every node of the second component
    /// is joined onto the first's record.
    pub fn link_node_and_node(&self, a: &NodeInfo, b: &NodeInfo) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.link_node_and_node_with_txn(txn, a, b))
    }

    /// Transaction-scoped form of
    /// [`link_node_and_node`](Self::link_node_and_node).
    pub fn link_node_and_node_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        a: &NodeInfo,
        b: &NodeInfo,
    ) -> Result<()> {
        self.ensure_running()?;
        if a.id == b.id {
            return Err(GestaltError::InvalidArgument(
                "cannot link a node to itself".into(),
            ));
        }
        let vertex_a = VertexId::Node(a.id.clone());
        let vertex_b = VertexId::Node(b.id.clone());
        let key_a = vertex_a.to_key()?;
        let key_b = vertex_b.to_key()?;
        let neighbors_a = tables::get_neighbors(txn, &key_a)?;
        let neighbors_b = tables::get_neighbors(txn, &key_b)?;

        let a_lists_b = neighbors_a.as_ref().is_some_and(|s| s.contains(&vertex_b));
        let b_lists_a = neighbors_b.as_ref().is_some_and(|s| s.contains(&vertex_a));
        if a_lists_b != b_lists_a {
            return Err(corruption(format!(
                "edge {}<->{} present on one side only",
                a.id, b.id
            )));
        }
        if a_lists_b {
            tables::put_node_info(txn, &key_a, a)?;
            tables::put_node_info(txn, &key_b, b)?;
            return Ok(());
        }

        match (&neighbors_a, &neighbors_b) {
            // Both brand new: one fresh permission shared by both.
            (None, None) => {
                acl::set_perm(txn, &a.id, &Permission::default())?;
                acl::join_perm(txn, &a.id, std::slice::from_ref(&b.id), None)?;
            }
            // New node adopts the existing side's permission
            // unchanged.
            (Some(_), None) => {
                acl::join_perm(txn, &a.id, std::slice::from_ref(&b.id), None)?;
            }
            (None, Some(_)) => {
                acl::join_perm(txn, &b.id, std::slice::from_ref(&a.id), None)?;
            }
            // Two existing components: union and join b's side onto
            // a's record. When both already share a record (another
            // path connects them) there is nothing to merge.
            (Some(_), Some(_)) => {
                let perm_id_a = acl::get_ref(txn, &a.id)?
                    .ok_or_else(|| corruption(format!("node vertex {} has no permission record", a.id)))?;
                let perm_id_b = acl::get_ref(txn, &b.id)?
                    .ok_or_else(|| corruption(format!("node vertex {} has no permission record", b.id)))?;
                if perm_id_a != perm_id_b {
                    self.merge_components(txn, &a.id, &b.id, key_b.clone())?;
                }
            }
        }

        let mut set_a = neighbors_a.unwrap_or_default();
        let mut set_b = neighbors_b.unwrap_or_default();
        set_a.insert(vertex_b);
        set_b.insert(vertex_a);
        tables::put_neighbors(txn, &key_a, &set_a)?;
        tables::put_neighbors(txn, &key_b, &set_b)?;
        tables::put_node_info(txn, &key_a, a)?;
        tables::put_node_info(txn, &key_b, b)?;
        GraphMetrics::bump(&self.metrics.links);
        debug!(a = %a.id, b = %b.id, "nodes linked");
        Ok(())
    }

    /// Links a node vertex and an identity vertex, creating either as
    /// needed. Identities never own permissions, so only the node
    /// side of the classification can contribute one.
    pub fn link_node_and_identity(&self, node: &NodeInfo, identity: &IdentityInfo) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.link_node_and_identity_with_txn(txn, node, identity))
    }

    /// Transaction-scoped form of
    /// [`link_node_and_identity`](Self::link_node_and_identity).
    pub fn link_node_and_identity_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        node: &NodeInfo,
        identity: &IdentityInfo,
    ) -> Result<()> {
        self.ensure_running()?;
        let vertex_n = VertexId::Node(node.id.clone());
        let vertex_i = identity.vertex();
        let key_n = vertex_n.to_key()?;
        let key_i = vertex_i.to_key()?;
        let neighbors_n = tables::get_neighbors(txn, &key_n)?;
        let neighbors_i = tables::get_neighbors(txn, &key_i)?;

        let n_lists_i = neighbors_n.as_ref().is_some_and(|s| s.contains(&vertex_i));
        let i_lists_n = neighbors_i.as_ref().is_some_and(|s| s.contains(&vertex_n));
        if n_lists_i != i_lists_n {
            return Err(corruption(format!(
                "edge {}<->{}:{} present on one side only",
                node.id, identity.provider_id, identity.identity_id
            )));
        }
        if n_lists_i {
            tables::put_node_info(txn, &key_n, node)?;
            tables::put_identity_info(txn, &key_i, identity)?;
            return Ok(());
        }

        // The identity's anchor, when it has one, stands in for the
        // permission of its whole component.
        let anchor = neighbors_i
            .as_ref()
            .and_then(|s| s.iter().find_map(|v| v.as_node()).cloned());
        match (&neighbors_n, anchor) {
            // No existing permission on either side: the (possibly
            // new) node gets a fresh one.
            (None, None) => {
                acl::set_perm(txn, &node.id, &Permission::default())?;
            }
            // Existing node, identity contributes nothing.
            (Some(_), None) => {}
            // New node adopts the anchored component's permission.
            (None, Some(anchor)) => {
                acl::join_perm(txn, &anchor, std::slice::from_ref(&node.id), None)?;
            }
            // Two existing components, bridged through the identity.
            (Some(_), Some(anchor)) => {
                let perm_id_n = acl::get_ref(txn, &node.id)?.ok_or_else(|| {
                    corruption(format!("node vertex {} has no permission record", node.id))
                })?;
                let perm_id_anchor = acl::get_ref(txn, &anchor)?.ok_or_else(|| {
                    corruption(format!("node vertex {anchor} has no permission record"))
                })?;
                if perm_id_n != perm_id_anchor {
                    self.merge_components(txn, &node.id, &anchor, key_i.clone())?;
                }
            }
        }

        let mut set_n = neighbors_n.unwrap_or_default();
        let mut set_i = neighbors_i.unwrap_or_default();
        set_n.insert(vertex_i);
        set_i.insert(vertex_n);
        tables::put_neighbors(txn, &key_n, &set_n)?;
        tables::put_neighbors(txn, &key_i, &set_i)?;
        tables::put_node_info(txn, &key_n, node)?;
        tables::put_identity_info(txn, &key_i, identity)?;
        GraphMetrics::bump(&self.metrics.links);
        debug!(
            node = %node.id,
            provider = %identity.provider_id,
            identity = %identity.identity_id,
            "node and identity linked"
        );
        Ok(())
    }

    /// Unions `anchor`'s and `other`'s permissions and joins every
    /// node of the component around `other_seed` onto `anchor`'s
    /// record. The seed is the vertex on `other`'s side the edge will
    /// attach to; the edge itself is not written yet, so the
    /// traversal sees exactly the old component.
    fn merge_components(
        &self,
        txn: &mut StoreTxn<'_>,
        anchor: &NodeId,
        other: &NodeId,
        other_seed: VertexKey,
    ) -> Result<()> {
        let perm_anchor = acl::get_perm(txn, anchor)?
            .ok_or_else(|| corruption(format!("node vertex {anchor} has no permission record")))?;
        let perm_other = acl::get_perm(txn, other)?
            .ok_or_else(|| corruption(format!("node vertex {other} has no permission record")))?;
        let component = traverse(txn, vec![other_seed], &BTreeSet::new(), &self.options)?;
        self.metrics.record_traversal(component.len());
        let unioned = perm_anchor.union(&perm_other);
        acl::join_perm(txn, anchor, &component.nodes, Some(&unioned))?;
        GraphMetrics::bump(&self.metrics.merges);
        info!(
            anchor = %anchor,
            other = %other,
            members = component.nodes.len(),
            "gestalt permissions merged"
        );
        Ok(())
    }

    /// Removes the edge between two node vertices. When the removal
    /// disconnects them, the surviving component around `a` is
    /// stamped with a fresh copy of the shared permission.
    pub fn unlink_node_and_node(&self, a: &NodeId, b: &NodeId) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.unlink_node_and_node_with_txn(txn, a, b))
    }

    /// Transaction-scoped form of
    /// [`unlink_node_and_node`](Self::unlink_node_and_node).
    pub fn unlink_node_and_node_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        a: &NodeId,
        b: &NodeId,
    ) -> Result<()> {
        self.ensure_running()?;
        if a == b {
            return Err(GestaltError::InvalidArgument(
                "cannot unlink a node from itself".into(),
            ));
        }
        let vertex_a = VertexId::Node(a.clone());
        let vertex_b = VertexId::Node(b.clone());
        let key_a = vertex_a.to_key()?;
        let key_b = vertex_b.to_key()?;
        let Some(mut set_a) = tables::get_neighbors(txn, &key_a)? else {
            return Ok(());
        };
        let Some(mut set_b) = tables::get_neighbors(txn, &key_b)? else {
            return Ok(());
        };
        let a_lists_b = set_a.contains(&vertex_b);
        let b_lists_a = set_b.contains(&vertex_a);
        if a_lists_b != b_lists_a {
            return Err(corruption(format!(
                "edge {a}<->{b} present on one side only"
            )));
        }
        if !a_lists_b {
            return Ok(());
        }
        set_a.remove(&vertex_b);
        set_b.remove(&vertex_a);
        tables::put_neighbors(txn, &key_a, &set_a)?;
        tables::put_neighbors(txn, &key_b, &set_b)?;
        GraphMetrics::bump(&self.metrics.unlinks);
        debug!(a = %a, b = %b, "nodes unlinked");

        self.split_if_disconnected(txn, a, key_a, &key_b)
    }

    /// Removes the edge between a node vertex and an identity vertex,
    /// cloning the node side's permission if the component split.
    pub fn unlink_node_and_identity(
        &self,
        node: &NodeId,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.unlink_node_and_identity_with_txn(txn, node, provider, identity))
    }

    /// Transaction-scoped form of
    /// [`unlink_node_and_identity`](Self::unlink_node_and_identity).
    pub fn unlink_node_and_identity_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        node: &NodeId,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<()> {
        self.ensure_running()?;
        let vertex_n = VertexId::Node(node.clone());
        let vertex_i = VertexId::Identity(provider.clone(), identity.clone());
        let key_n = vertex_n.to_key()?;
        let key_i = vertex_i.to_key()?;
        let Some(mut set_n) = tables::get_neighbors(txn, &key_n)? else {
            return Ok(());
        };
        let Some(mut set_i) = tables::get_neighbors(txn, &key_i)? else {
            return Ok(());
        };
        let n_lists_i = set_n.contains(&vertex_i);
        let i_lists_n = set_i.contains(&vertex_n);
        if n_lists_i != i_lists_n {
            return Err(corruption(format!(
                "edge {node}<->{provider}:{identity} present on one side only"
            )));
        }
        if !n_lists_i {
            return Ok(());
        }
        set_n.remove(&vertex_i);
        set_i.remove(&vertex_n);
        tables::put_neighbors(txn, &key_n, &set_n)?;
        tables::put_neighbors(txn, &key_i, &set_i)?;
        GraphMetrics::bump(&self.metrics.unlinks);
        debug!(node = %node, provider = %provider, identity = %identity, "node and identity unlinked");

        self.split_if_disconnected(txn, node, key_n, &key_i)
    }

    /// Re-traverses from `seed` under the just-written adjacency and,
    /// when `other` is no longer reachable, stamps the surviving node
    /// set with a fresh shared copy of the current permission. The old
    /// record stays with the other side, or drains to zero and is
    /// deleted when that side has no nodes.
    fn split_if_disconnected(
        &self,
        txn: &mut StoreTxn<'_>,
        survivor: &NodeId,
        seed: VertexKey,
        other: &VertexKey,
    ) -> Result<()> {
        let component = traverse(txn, vec![seed], &BTreeSet::new(), &self.options)?;
        self.metrics.record_traversal(component.len());
        if component.contains(other) {
            return Ok(());
        }
        let perm = acl::get_perm(txn, survivor)?
            .ok_or_else(|| corruption(format!("node vertex {survivor} has no permission record")))?;
        acl::set_perm_for_all(txn, &component.nodes, &perm)?;
        GraphMetrics::bump(&self.metrics.splits);
        info!(
            survivor = %survivor,
            members = component.nodes.len(),
            "gestalt split; permission cloned"
        );
        Ok(())
    }
}
