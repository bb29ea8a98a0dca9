//! Vertex identities, vertex metadata, permissions, and materialized
//! gestalts.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::keys::VertexKey;
use crate::types::{GestaltAction, IdentityId, NodeId, ProviderId, VaultAction, VaultId};

/// Decoded identity of a graph vertex.
///
/// `Node` sorts before `Identity`, so iterating a sorted set of vertex
/// ids yields node vertices first, ordered by `NodeId` — the property
/// the identity anchor rule relies on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VertexId {
    /// A cryptographic node identity.
    Node(NodeId),
    /// An identity-provider account.
    Identity(ProviderId, IdentityId),
}

impl VertexId {
    /// Returns the node id when this vertex is a node.
    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            VertexId::Node(id) => Some(id),
            VertexId::Identity(..) => None,
        }
    }
}

/// Metadata for a node vertex: the node id plus discovered chain and
/// address data, carried opaquely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's identity.
    pub id: NodeId,
    /// Discovered sigchain/address claims, keyed by claim id.
    pub chain: BTreeMap<String, String>,
}

impl NodeInfo {
    /// Creates metadata for a node with an empty claim chain.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            chain: BTreeMap::new(),
        }
    }
}

/// Metadata for an identity vertex.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    /// The identity provider.
    pub provider_id: ProviderId,
    /// The account within that provider.
    pub identity_id: IdentityId,
    /// Verified claims attached to the identity.
    pub claims: BTreeMap<String, String>,
}

impl IdentityInfo {
    /// Creates metadata for an identity with no claims.
    pub fn new(provider_id: impl Into<ProviderId>, identity_id: impl Into<IdentityId>) -> Self {
        Self {
            provider_id: provider_id.into(),
            identity_id: identity_id.into(),
            claims: BTreeMap::new(),
        }
    }

    /// The vertex id of this identity.
    pub fn vertex(&self) -> VertexId {
        VertexId::Identity(self.provider_id.clone(), self.identity_id.clone())
    }
}

/// The permission shared by all nodes of one gestalt: gestalt-level
/// actions plus per-vault action sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Actions granted at the gestalt level.
    pub gestalt_actions: BTreeSet<GestaltAction>,
    /// Actions granted per vault.
    pub vault_actions: BTreeMap<VaultId, BTreeSet<VaultAction>>,
}

impl Permission {
    /// Joins two permissions: set-union of gestalt actions, per-vault
    /// set-union of vault actions.
    ///
    /// Commutative, associative, and idempotent, so permissions merged
    /// in any order converge on the same value.
    pub fn union(&self, other: &Permission) -> Permission {
        let mut out = self.clone();
        out.gestalt_actions
            .extend(other.gestalt_actions.iter().copied());
        for (vault, actions) in &other.vault_actions {
            out.vault_actions
                .entry(vault.clone())
                .or_default()
                .extend(actions.iter().copied());
        }
        out
    }
}

/// A materialized connected component: the induced adjacency map plus
/// the metadata of every member vertex. Computed on demand, never
/// stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Gestalt {
    /// Adjacency of every member vertex.
    pub matrix: BTreeMap<VertexKey, BTreeSet<VertexKey>>,
    /// Node members and their metadata.
    pub nodes: BTreeMap<VertexKey, NodeInfo>,
    /// Identity members and their metadata.
    pub identities: BTreeMap<VertexKey, IdentityInfo>,
}

impl Gestalt {
    /// Number of member vertices.
    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    /// True when the gestalt has no members.
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }
}
