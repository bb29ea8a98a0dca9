//! Gestalt trust graph and permission-consistency engine.
//!
//! Models trust between cryptographic node identities and
//! identity-provider accounts as an undirected graph over a
//! transactional key-value store, and keeps a reference-counted
//! permission store consistent with the graph's connectivity: every
//! connected component ("gestalt") shares exactly one permission
//! record. Linking two components unions their permissions; an unlink
//! that splits a component clones the permission so each side is
//! independently mutable. All mutations run inside one store
//! transaction, so a partial failure never leaves dangling edges,
//! orphaned permissions, or double-counted references.
//!
//! The entry point is [`GestaltGraph`]; the permission store contract
//! it consumes lives in [`acl`], and the transactional store seam in
//! [`store`].

#![warn(missing_docs)]

pub mod acl;
pub mod error;
pub mod gestalt;
mod keys;
pub mod model;
pub mod store;
pub mod types;

pub use error::{GestaltError, Result};
pub use gestalt::{
    GestaltGraph, GraphMetrics, GraphOptions, IntegrityReport, LifecycleState, MetricsSnapshot,
};
pub use keys::VertexKey;
pub use model::{Gestalt, IdentityInfo, NodeInfo, Permission, VertexId};
pub use store::{Store, StoreError, StoreTxn, TxState};
pub use types::{GestaltAction, IdentityId, NodeId, ProviderId, VaultAction, VaultId};
