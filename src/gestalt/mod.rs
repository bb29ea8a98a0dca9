//! Gestalt graph facade.
//!
//! Orchestrates the key codec, adjacency and metadata tables,
//! component traversal, and the permission store behind one surface,
//! preserving the core invariant: every node of one connected
//! component resolves to the same permission record. Linking two
//! components merges their permissions; an unlink that splits a
//! component clones the permission so each side evolves
//! independently.

mod integrity;
mod links;
mod metrics;
mod options;
mod tables;
mod traversal;

#[cfg(test)]
mod tests;

pub use integrity::IntegrityReport;
pub use metrics::{GraphMetrics, MetricsSnapshot};
pub use options::GraphOptions;

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::acl;
use crate::error::{corruption, GestaltError, Result};
use crate::keys::{self, VertexKey};
use crate::model::{Gestalt, IdentityInfo, NodeInfo, Permission, VertexId};
use crate::store::{Store, StoreTxn};
use crate::types::{GestaltAction, IdentityId, NodeId, ProviderId};

use traversal::{traverse, Component};

/// Lifecycle of a [`GestaltGraph`] engine.
///
/// Every public operation checks the state first; anything other than
/// `Running` yields a typed precondition error. `stop()` returns the
/// engine to `Uninitialized` so it can be restarted; `destroy()` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed or stopped; `start()` is the only legal operation.
    Uninitialized,
    /// Accepting operations.
    Running,
    /// A `stop()` call is in flight.
    Stopping,
    /// Destroyed; all data deleted, no operation is legal.
    Destroyed,
}

/// The gestalt trust graph engine.
///
/// All mutating operations exist in two forms: a `*_with_txn` variant
/// running against a caller-supplied transaction, and a convenience
/// form that opens one transaction, applies the operation, and
/// commits. The transaction is the unit of atomicity — no operation
/// is observably partially applied. On [`StoreError::Conflict`] the
/// transaction has been rolled back and the caller retries.
///
/// [`StoreError::Conflict`]: crate::store::StoreError::Conflict
pub struct GestaltGraph {
    store: Arc<Store>,
    options: GraphOptions,
    metrics: GraphMetrics,
    state: RwLock<LifecycleState>,
}

impl GestaltGraph {
    /// Creates an engine over `store`. The engine starts
    /// `Uninitialized`; call [`start`](Self::start) before use.
    pub fn new(store: Arc<Store>, options: GraphOptions) -> Self {
        Self {
            store,
            options,
            metrics: GraphMetrics::default(),
            state: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Configured options.
    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    /// Counter snapshot. Not lifecycle-gated; safe at any time.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Transitions `Uninitialized -> Running`.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Uninitialized => {
                *state = LifecycleState::Running;
                info!("gestalt graph started");
                Ok(())
            }
            actual => Err(GestaltError::Lifecycle {
                expected: LifecycleState::Uninitialized,
                actual,
            }),
        }
    }

    /// Transitions `Running -> Uninitialized`. The store keeps its
    /// data; a later `start()` resumes over it.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Running => {
                *state = LifecycleState::Stopping;
                // Nothing buffered outside the store to flush.
                *state = LifecycleState::Uninitialized;
                info!("gestalt graph stopped");
                Ok(())
            }
            actual => Err(GestaltError::Lifecycle {
                expected: LifecycleState::Running,
                actual,
            }),
        }
    }

    /// Deletes every key this engine owns and transitions to
    /// `Destroyed`. Only legal on a stopped engine.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Uninitialized => {
                self.with_txn(|txn| {
                    for table in [
                        keys::TABLE_MATRIX,
                        keys::TABLE_NODE_META,
                        keys::TABLE_IDENTITY_META,
                        keys::TABLE_ACL_REF,
                        keys::TABLE_ACL_PERM,
                    ] {
                        for (key, _) in txn.scan_prefix(&[table])? {
                            txn.del(&key)?;
                        }
                    }
                    txn.del(&keys::acl_counter_key())?;
                    Ok(())
                })?;
                *state = LifecycleState::Destroyed;
                info!("gestalt graph destroyed");
                Ok(())
            }
            actual => Err(GestaltError::Lifecycle {
                expected: LifecycleState::Uninitialized,
                actual,
            }),
        }
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        let actual = *self.state.read();
        if actual != LifecycleState::Running {
            return Err(GestaltError::Lifecycle {
                expected: LifecycleState::Running,
                actual,
            });
        }
        Ok(())
    }

    pub(crate) fn with_txn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T>,
    {
        let mut txn = self.store.begin();
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    // ---- vertex lifecycle ----

    /// Idempotent upsert of a node vertex. A brand-new node vertex is
    /// paired with a fresh empty permission.
    pub fn set_node(&self, info: &NodeInfo) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.set_node_with_txn(txn, info))
    }

    /// Transaction-scoped form of [`set_node`](Self::set_node).
    pub fn set_node_with_txn(&self, txn: &mut StoreTxn<'_>, info: &NodeInfo) -> Result<()> {
        self.ensure_running()?;
        let vertex = VertexId::Node(info.id.clone()).to_key()?;
        if tables::get_neighbors(txn, &vertex)?.is_none() {
            tables::put_neighbors(txn, &vertex, &BTreeSet::new())?;
            acl::set_perm(txn, &info.id, &Permission::default())?;
            debug!(node = %info.id, "node vertex created");
        }
        tables::put_node_info(txn, &vertex, info)?;
        GraphMetrics::bump(&self.metrics.vertex_upserts);
        Ok(())
    }

    /// Removes a node vertex: unlinks every incident edge (which may
    /// split its gestalt), deletes its metadata, and releases its
    /// permission. Removing an absent node is a no-op.
    pub fn unset_node(&self, id: &NodeId) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.unset_node_with_txn(txn, id))
    }

    /// Transaction-scoped form of [`unset_node`](Self::unset_node).
    pub fn unset_node_with_txn(&self, txn: &mut StoreTxn<'_>, id: &NodeId) -> Result<()> {
        self.ensure_running()?;
        let vertex = VertexId::Node(id.clone()).to_key()?;
        let Some(neighbors) = tables::get_neighbors(txn, &vertex)? else {
            return Ok(());
        };
        for neighbor in neighbors {
            match neighbor {
                VertexId::Node(other) => {
                    self.unlink_node_and_node_with_txn(txn, id, &other)?;
                }
                VertexId::Identity(provider, identity) => {
                    self.unlink_node_and_identity_with_txn(txn, id, &provider, &identity)?;
                }
            }
        }
        tables::del_neighbors(txn, &vertex)?;
        tables::del_node_info(txn, &vertex)?;
        acl::unset_perm(txn, id)?;
        GraphMetrics::bump(&self.metrics.vertex_removals);
        debug!(node = %id, "node vertex removed");
        Ok(())
    }

    /// Idempotent upsert of an identity vertex. Identities never own
    /// a permission.
    pub fn set_identity(&self, info: &IdentityInfo) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.set_identity_with_txn(txn, info))
    }

    /// Transaction-scoped form of [`set_identity`](Self::set_identity).
    pub fn set_identity_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        info: &IdentityInfo,
    ) -> Result<()> {
        self.ensure_running()?;
        let vertex = info.vertex().to_key()?;
        if tables::get_neighbors(txn, &vertex)?.is_none() {
            tables::put_neighbors(txn, &vertex, &BTreeSet::new())?;
            debug!(provider = %info.provider_id, identity = %info.identity_id, "identity vertex created");
        }
        tables::put_identity_info(txn, &vertex, info)?;
        GraphMetrics::bump(&self.metrics.vertex_upserts);
        Ok(())
    }

    /// Removes an identity vertex after unlinking every incident
    /// edge. Removing an absent identity is a no-op.
    pub fn unset_identity(&self, provider: &ProviderId, identity: &IdentityId) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.unset_identity_with_txn(txn, provider, identity))
    }

    /// Transaction-scoped form of
    /// [`unset_identity`](Self::unset_identity).
    pub fn unset_identity_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<()> {
        self.ensure_running()?;
        let vertex = VertexId::Identity(provider.clone(), identity.clone()).to_key()?;
        let Some(neighbors) = tables::get_neighbors(txn, &vertex)? else {
            return Ok(());
        };
        for neighbor in neighbors {
            if let VertexId::Node(node) = neighbor {
                self.unlink_node_and_identity_with_txn(txn, &node, provider, identity)?;
            }
        }
        tables::del_neighbors(txn, &vertex)?;
        tables::del_identity_info(txn, &vertex)?;
        GraphMetrics::bump(&self.metrics.vertex_removals);
        debug!(provider = %provider, identity = %identity, "identity vertex removed");
        Ok(())
    }

    // ---- metadata reads ----

    /// Reads a node vertex's metadata.
    pub fn get_node(&self, id: &NodeId) -> Result<Option<NodeInfo>> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let vertex = VertexId::Node(id.clone()).to_key()?;
            tables::get_node_info(txn, &vertex)
        })
    }

    /// Reads an identity vertex's metadata.
    pub fn get_identity(
        &self,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<Option<IdentityInfo>> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let vertex = VertexId::Identity(provider.clone(), identity.clone()).to_key()?;
            tables::get_identity_info(txn, &vertex)
        })
    }

    /// All node vertices, ascending by key.
    pub fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.ensure_running()?;
        self.with_txn(tables::all_node_infos)
    }

    /// All identity vertices, ascending by key.
    pub fn identities(&self) -> Result<Vec<IdentityInfo>> {
        self.ensure_running()?;
        self.with_txn(tables::all_identity_infos)
    }

    // ---- gestalt reads ----

    /// Partitions the whole graph into its gestalts.
    pub fn get_gestalts(&self) -> Result<Vec<Gestalt>> {
        self.ensure_running()?;
        self.with_txn(|txn| self.get_gestalts_with_txn(txn))
    }

    /// Transaction-scoped form of [`get_gestalts`](Self::get_gestalts).
    pub fn get_gestalts_with_txn(&self, txn: &mut StoreTxn<'_>) -> Result<Vec<Gestalt>> {
        self.ensure_running()?;
        let all = tables::all_matrix_keys(txn)?;
        let mut visited: BTreeSet<VertexKey> = BTreeSet::new();
        let mut gestalts = Vec::new();
        for vertex in all {
            if visited.contains(&vertex) {
                continue;
            }
            let component = traverse(txn, vec![vertex], &visited, &self.options)?;
            self.metrics.record_traversal(component.len());
            if component.is_empty() {
                continue;
            }
            visited.extend(component.matrix.keys().cloned());
            gestalts.push(self.materialize(txn, component)?);
        }
        Ok(gestalts)
    }

    /// Materializes the gestalt containing a node vertex.
    pub fn get_gestalt_by_node(&self, id: &NodeId) -> Result<Option<Gestalt>> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let vertex = VertexId::Node(id.clone()).to_key()?;
            self.gestalt_from_seed(txn, vertex)
        })
    }

    /// Materializes the gestalt containing an identity vertex.
    pub fn get_gestalt_by_identity(
        &self,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<Option<Gestalt>> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let vertex = VertexId::Identity(provider.clone(), identity.clone()).to_key()?;
            self.gestalt_from_seed(txn, vertex)
        })
    }

    fn gestalt_from_seed(
        &self,
        txn: &mut StoreTxn<'_>,
        seed: VertexKey,
    ) -> Result<Option<Gestalt>> {
        let component = traverse(txn, vec![seed], &BTreeSet::new(), &self.options)?;
        self.metrics.record_traversal(component.len());
        if component.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.materialize(txn, component)?))
    }

    fn materialize(&self, txn: &mut StoreTxn<'_>, component: Component) -> Result<Gestalt> {
        let mut gestalt = Gestalt::default();
        for (vertex, neighbors) in &component.matrix {
            let neighbor_keys: BTreeSet<VertexKey> = neighbors
                .iter()
                .map(|n| n.to_key())
                .collect::<Result<_>>()?;
            gestalt.matrix.insert(vertex.clone(), neighbor_keys);
        }
        for node in &component.nodes {
            let vertex = VertexId::Node(node.clone()).to_key()?;
            let info = tables::get_node_info(txn, &vertex)?
                .ok_or_else(|| corruption(format!("node vertex {node} missing metadata")))?;
            gestalt.nodes.insert(vertex, info);
        }
        for (provider, identity) in &component.identities {
            let vertex = VertexId::Identity(provider.clone(), identity.clone()).to_key()?;
            let info = tables::get_identity_info(txn, &vertex)?.ok_or_else(|| {
                corruption(format!(
                    "identity vertex {provider}:{identity} missing metadata"
                ))
            })?;
            gestalt.identities.insert(vertex, info);
        }
        Ok(gestalt)
    }

    // ---- action queries and mutations ----

    /// Gestalt-level actions granted to the component containing a
    /// node.
    ///
    /// # Errors
    /// `NotFound` when the node vertex does not exist.
    pub fn get_gestalt_actions_by_node(&self, id: &NodeId) -> Result<BTreeSet<GestaltAction>> {
        self.ensure_running()?;
        self.with_txn(|txn| self.get_gestalt_actions_by_node_with_txn(txn, id))
    }

    /// Transaction-scoped form of
    /// [`get_gestalt_actions_by_node`](Self::get_gestalt_actions_by_node).
    pub fn get_gestalt_actions_by_node_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        id: &NodeId,
    ) -> Result<BTreeSet<GestaltAction>> {
        self.ensure_running()?;
        self.require_node(txn, id)?;
        let perm = acl::get_perm(txn, id)?
            .ok_or_else(|| corruption(format!("node vertex {id} has no permission record")))?;
        Ok(perm.gestalt_actions)
    }

    /// Grants a gestalt-level action to the component containing a
    /// node.
    pub fn set_gestalt_action_by_node(&self, id: &NodeId, action: GestaltAction) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.set_gestalt_action_by_node_with_txn(txn, id, action))
    }

    /// Transaction-scoped form of
    /// [`set_gestalt_action_by_node`](Self::set_gestalt_action_by_node).
    pub fn set_gestalt_action_by_node_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        id: &NodeId,
        action: GestaltAction,
    ) -> Result<()> {
        self.ensure_running()?;
        self.require_node(txn, id)?;
        let updated = acl::update_perm(txn, id, |perm| {
            perm.gestalt_actions.insert(action);
        })?;
        if !updated {
            return Err(corruption(format!(
                "node vertex {id} has no permission record"
            )));
        }
        debug!(node = %id, ?action, "gestalt action granted");
        Ok(())
    }

    /// Revokes a gestalt-level action from the component containing a
    /// node.
    pub fn unset_gestalt_action_by_node(&self, id: &NodeId, action: GestaltAction) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| self.unset_gestalt_action_by_node_with_txn(txn, id, action))
    }

    /// Transaction-scoped form of
    /// [`unset_gestalt_action_by_node`](Self::unset_gestalt_action_by_node).
    pub fn unset_gestalt_action_by_node_with_txn(
        &self,
        txn: &mut StoreTxn<'_>,
        id: &NodeId,
        action: GestaltAction,
    ) -> Result<()> {
        self.ensure_running()?;
        self.require_node(txn, id)?;
        let updated = acl::update_perm(txn, id, |perm| {
            perm.gestalt_actions.remove(&action);
        })?;
        if !updated {
            return Err(corruption(format!(
                "node vertex {id} has no permission record"
            )));
        }
        debug!(node = %id, ?action, "gestalt action revoked");
        Ok(())
    }

    /// Actions for the component containing an identity, resolved
    /// through its anchor node.
    ///
    /// # Errors
    /// `NotFound` when the identity vertex does not exist or has no
    /// node neighbor to anchor through.
    pub fn get_gestalt_actions_by_identity(
        &self,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<BTreeSet<GestaltAction>> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let anchor = self.resolve_identity_anchor(txn, provider, identity)?;
            self.get_gestalt_actions_by_node_with_txn(txn, &anchor)
        })
    }

    /// Grants an action via an identity's anchor node.
    pub fn set_gestalt_action_by_identity(
        &self,
        provider: &ProviderId,
        identity: &IdentityId,
        action: GestaltAction,
    ) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let anchor = self.resolve_identity_anchor(txn, provider, identity)?;
            self.set_gestalt_action_by_node_with_txn(txn, &anchor, action)
        })
    }

    /// Revokes an action via an identity's anchor node.
    pub fn unset_gestalt_action_by_identity(
        &self,
        provider: &ProviderId,
        identity: &IdentityId,
        action: GestaltAction,
    ) -> Result<()> {
        self.ensure_running()?;
        self.with_txn(|txn| {
            let anchor = self.resolve_identity_anchor(txn, provider, identity)?;
            self.unset_gestalt_action_by_node_with_txn(txn, &anchor, action)
        })
    }

    /// Resolves the anchor node of an identity vertex: the
    /// lexicographically smallest node id in its neighbor set. Sorted
    /// adjacency makes the choice deterministic.
    fn resolve_identity_anchor(
        &self,
        txn: &mut StoreTxn<'_>,
        provider: &ProviderId,
        identity: &IdentityId,
    ) -> Result<NodeId> {
        let vertex = VertexId::Identity(provider.clone(), identity.clone()).to_key()?;
        let neighbors =
            tables::get_neighbors(txn, &vertex)?.ok_or(GestaltError::NotFound("identity"))?;
        neighbors
            .iter()
            .find_map(|v| v.as_node())
            .cloned()
            .ok_or(GestaltError::NotFound("identity anchor node"))
    }

    fn require_node(&self, txn: &mut StoreTxn<'_>, id: &NodeId) -> Result<()> {
        let vertex = VertexId::Node(id.clone()).to_key()?;
        if tables::get_neighbors(txn, &vertex)?.is_none() {
            return Err(GestaltError::NotFound("node"));
        }
        Ok(())
    }
}
