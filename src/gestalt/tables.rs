//! Primitive operations over the adjacency and vertex metadata tables.
//!
//! `get_neighbors` returning `None` is the authoritative signal that a
//! vertex does not exist; a present empty set means "vertex exists, no
//! edges".

use std::collections::BTreeSet;

use crate::error::Result;
use crate::keys::{self, VertexKey};
use crate::model::{IdentityInfo, NodeInfo, VertexId};
use crate::store::StoreTxn;

pub(crate) fn get_neighbors(
    txn: &mut StoreTxn<'_>,
    vertex: &VertexKey,
) -> Result<Option<BTreeSet<VertexId>>> {
    match txn.get(&keys::matrix_key(vertex))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    }
}

pub(crate) fn put_neighbors(
    txn: &mut StoreTxn<'_>,
    vertex: &VertexKey,
    neighbors: &BTreeSet<VertexId>,
) -> Result<()> {
    txn.put(&keys::matrix_key(vertex), serde_json::to_vec(neighbors)?)?;
    Ok(())
}

pub(crate) fn del_neighbors(txn: &mut StoreTxn<'_>, vertex: &VertexKey) -> Result<()> {
    txn.del(&keys::matrix_key(vertex))?;
    Ok(())
}

/// All vertex keys present in the adjacency table, ascending.
pub(crate) fn all_matrix_keys(txn: &mut StoreTxn<'_>) -> Result<Vec<VertexKey>> {
    let rows = txn.scan_prefix(&[keys::TABLE_MATRIX])?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        // Re-encode through the codec so malformed keys surface here
        // instead of deep inside a traversal.
        out.push(keys::decode_vertex_key(&key[1..])?.to_key()?);
    }
    Ok(out)
}

pub(crate) fn get_node_info(
    txn: &mut StoreTxn<'_>,
    vertex: &VertexKey,
) -> Result<Option<NodeInfo>> {
    match txn.get(&keys::node_meta_key(vertex))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    }
}

pub(crate) fn put_node_info(
    txn: &mut StoreTxn<'_>,
    vertex: &VertexKey,
    info: &NodeInfo,
) -> Result<()> {
    txn.put(&keys::node_meta_key(vertex), serde_json::to_vec(info)?)?;
    Ok(())
}

pub(crate) fn del_node_info(txn: &mut StoreTxn<'_>, vertex: &VertexKey) -> Result<()> {
    txn.del(&keys::node_meta_key(vertex))?;
    Ok(())
}

pub(crate) fn all_node_infos(txn: &mut StoreTxn<'_>) -> Result<Vec<NodeInfo>> {
    let rows = txn.scan_prefix(&[keys::TABLE_NODE_META])?;
    let mut out = Vec::with_capacity(rows.len());
    for (_, value) in rows {
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

pub(crate) fn get_identity_info(
    txn: &mut StoreTxn<'_>,
    vertex: &VertexKey,
) -> Result<Option<IdentityInfo>> {
    match txn.get(&keys::identity_meta_key(vertex))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    }
}

pub(crate) fn put_identity_info(
    txn: &mut StoreTxn<'_>,
    vertex: &VertexKey,
    info: &IdentityInfo,
) -> Result<()> {
    txn.put(&keys::identity_meta_key(vertex), serde_json::to_vec(info)?)?;
    Ok(())
}

pub(crate) fn del_identity_info(txn: &mut StoreTxn<'_>, vertex: &VertexKey) -> Result<()> {
    txn.del(&keys::identity_meta_key(vertex))?;
    Ok(())
}

pub(crate) fn all_identity_infos(txn: &mut StoreTxn<'_>) -> Result<Vec<IdentityInfo>> {
    let rows = txn.scan_prefix(&[keys::TABLE_IDENTITY_META])?;
    let mut out = Vec::with_capacity(rows.len());
    for (_, value) in rows {
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}
