//! Reference-counted permission store.
//!
//! Permissions live in their own table pair: a `NodeId -> PermId`
//! reference table and refcounted permission records. Sharing one
//! record across a whole gestalt is what keeps invariant P2 cheap:
//! joining repoints references and bumps a count, it never copies.
//! All operations run against the caller's transaction, so a join or
//! a split-clone lands atomically with the graph mutation that caused
//! it.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{corruption, GestaltError, Result};
use crate::keys;
use crate::model::Permission;
use crate::store::StoreTxn;
use crate::types::NodeId;

/// A stored permission slot: the shared value plus how many node
/// references point at it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PermRecord {
    pub count: u32,
    pub perm: Permission,
}

fn read_counter(txn: &mut StoreTxn<'_>) -> Result<u64> {
    match txn.get(&keys::acl_counter_key())? {
        None => Ok(0),
        Some(bytes) => keys::decode_perm_id(&bytes),
    }
}

fn next_perm_id(txn: &mut StoreTxn<'_>) -> Result<u64> {
    let next = read_counter(txn)? + 1;
    txn.put(&keys::acl_counter_key(), next.to_be_bytes().to_vec())?;
    Ok(next)
}

pub(crate) fn get_ref(txn: &mut StoreTxn<'_>, node: &NodeId) -> Result<Option<u64>> {
    match txn.get(&keys::acl_ref_key(node))? {
        None => Ok(None),
        Some(bytes) => keys::decode_perm_id(&bytes).map(Some),
    }
}

fn put_ref(txn: &mut StoreTxn<'_>, node: &NodeId, perm_id: u64) -> Result<()> {
    txn.put(&keys::acl_ref_key(node), perm_id.to_be_bytes().to_vec())?;
    Ok(())
}

pub(crate) fn get_record(txn: &mut StoreTxn<'_>, perm_id: u64) -> Result<Option<PermRecord>> {
    match txn.get(&keys::acl_perm_key(perm_id))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    }
}

fn put_record(txn: &mut StoreTxn<'_>, perm_id: u64, record: &PermRecord) -> Result<()> {
    txn.put(&keys::acl_perm_key(perm_id), serde_json::to_vec(record)?)?;
    Ok(())
}

fn must_record(txn: &mut StoreTxn<'_>, perm_id: u64) -> Result<PermRecord> {
    get_record(txn, perm_id)?
        .ok_or_else(|| corruption(format!("permission record {perm_id} missing")))
}

/// Drops one reference to `perm_id`, deleting the record when the
/// count reaches zero.
fn release(txn: &mut StoreTxn<'_>, perm_id: u64) -> Result<()> {
    let mut record = must_record(txn, perm_id)?;
    if record.count == 0 {
        return Err(corruption(format!(
            "refcount underflow on permission record {perm_id}"
        )));
    }
    record.count -= 1;
    if record.count == 0 {
        txn.del(&keys::acl_perm_key(perm_id))?;
        debug!(perm_id, "permission record dropped");
    } else {
        put_record(txn, perm_id, &record)?;
    }
    Ok(())
}

/// Creates a fresh permission record for `node` with refcount 1,
/// releasing any record it previously referenced.
pub fn set_perm(txn: &mut StoreTxn<'_>, node: &NodeId, perm: &Permission) -> Result<()> {
    if let Some(old) = get_ref(txn, node)? {
        release(txn, old)?;
    }
    let perm_id = next_perm_id(txn)?;
    put_record(
        txn,
        perm_id,
        &PermRecord {
            count: 1,
            perm: perm.clone(),
        },
    )?;
    put_ref(txn, node, perm_id)?;
    Ok(())
}

/// Reads the permission `node` references, if any.
pub fn get_perm(txn: &mut StoreTxn<'_>, node: &NodeId) -> Result<Option<Permission>> {
    match get_ref(txn, node)? {
        None => Ok(None),
        Some(perm_id) => Ok(Some(must_record(txn, perm_id)?.perm)),
    }
}

/// Atomically repoints `others` onto `anchor`'s permission record,
/// optionally replacing the record's value first.
///
/// A node already sharing the anchor's record is skipped, so the
/// refcount never double-counts. Records the repointed nodes used to
/// reference lose one reference each and vanish at zero.
///
/// # Errors
/// `NotFound` when the anchor has no permission record.
pub fn join_perm(
    txn: &mut StoreTxn<'_>,
    anchor: &NodeId,
    others: &[NodeId],
    new_perm: Option<&Permission>,
) -> Result<()> {
    let perm_id =
        get_ref(txn, anchor)?.ok_or(GestaltError::NotFound("anchor permission"))?;
    let mut record = must_record(txn, perm_id)?;
    if let Some(perm) = new_perm {
        record.perm = perm.clone();
    }
    let mut seen: FxHashSet<&NodeId> = FxHashSet::default();
    let mut joined = 0usize;
    for node in others {
        if node == anchor || !seen.insert(node) {
            continue;
        }
        match get_ref(txn, node)? {
            Some(existing) if existing == perm_id => {}
            Some(existing) => {
                release(txn, existing)?;
                record.count += 1;
                put_ref(txn, node, perm_id)?;
                joined += 1;
            }
            None => {
                record.count += 1;
                put_ref(txn, node, perm_id)?;
                joined += 1;
            }
        }
    }
    put_record(txn, perm_id, &record)?;
    debug!(anchor = %anchor, joined, perm_id, "nodes joined onto permission");
    Ok(())
}

/// Split-clone: gives the whole node set one fresh record holding
/// `perm` (refcount = set size), releasing every old reference.
///
/// The surviving component keeps sharing a single record so later
/// mutations still propagate inside it; the record the nodes came
/// from stays behind for the other side of the split, or disappears
/// once its refcount drains to zero.
pub fn set_perm_for_all(
    txn: &mut StoreTxn<'_>,
    nodes: &[NodeId],
    perm: &Permission,
) -> Result<()> {
    let mut seen: FxHashSet<&NodeId> = FxHashSet::default();
    let unique: Vec<&NodeId> = nodes.iter().filter(|n| seen.insert(*n)).collect();
    if unique.is_empty() {
        return Ok(());
    }
    let perm_id = next_perm_id(txn)?;
    put_record(
        txn,
        perm_id,
        &PermRecord {
            count: unique.len() as u32,
            perm: perm.clone(),
        },
    )?;
    for node in unique {
        if let Some(old) = get_ref(txn, node)? {
            release(txn, old)?;
        }
        put_ref(txn, node, perm_id)?;
    }
    debug!(perm_id, members = nodes.len(), "permission cloned for split");
    Ok(())
}

/// Drops `node`'s reference; the record is deleted when it was the
/// last one. A node with no reference is a no-op.
pub fn unset_perm(txn: &mut StoreTxn<'_>, node: &NodeId) -> Result<()> {
    if let Some(perm_id) = get_ref(txn, node)? {
        release(txn, perm_id)?;
        txn.del(&keys::acl_ref_key(node))?;
    }
    Ok(())
}

/// Mutates the permission record `node` references in place. Returns
/// `false` when the node has no record.
pub(crate) fn update_perm<F>(txn: &mut StoreTxn<'_>, node: &NodeId, f: F) -> Result<bool>
where
    F: FnOnce(&mut Permission),
{
    let Some(perm_id) = get_ref(txn, node)? else {
        return Ok(false);
    };
    let mut record = must_record(txn, perm_id)?;
    f(&mut record.perm);
    put_record(txn, perm_id, &record)?;
    Ok(true)
}

/// Every `NodeId -> PermId` reference, for audits.
pub(crate) fn all_refs(txn: &mut StoreTxn<'_>) -> Result<Vec<(NodeId, u64)>> {
    let rows = txn.scan_prefix(&[keys::TABLE_ACL_REF])?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, value) in rows {
        let id = String::from_utf8(key[1..].to_vec())
            .map_err(|_| corruption("acl reference key is not utf-8"))?;
        out.push((NodeId(id), keys::decode_perm_id(&value)?));
    }
    Ok(out)
}

/// Every stored permission record, for audits.
pub(crate) fn all_records(txn: &mut StoreTxn<'_>) -> Result<Vec<(u64, PermRecord)>> {
    let rows = txn.scan_prefix(&[keys::TABLE_ACL_PERM])?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, value) in rows {
        let perm_id = keys::decode_perm_id(&key[1..])?;
        out.push((perm_id, serde_json::from_slice(&value)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::types::GestaltAction;

    fn notify_perm() -> Permission {
        Permission {
            gestalt_actions: [GestaltAction::Notify].into_iter().collect(),
            ..Permission::default()
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = Store::new();
        let mut txn = store.begin();
        let node = NodeId::from("a");
        set_perm(&mut txn, &node, &notify_perm()).unwrap();
        assert_eq!(get_perm(&mut txn, &node).unwrap(), Some(notify_perm()));
        txn.commit().unwrap();
    }

    #[test]
    fn join_shares_one_record() {
        let store = Store::new();
        let mut txn = store.begin();
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        set_perm(&mut txn, &a, &notify_perm()).unwrap();
        set_perm(&mut txn, &b, &Permission::default()).unwrap();
        join_perm(&mut txn, &a, &[b.clone()], None).unwrap();

        let id_a = get_ref(&mut txn, &a).unwrap().unwrap();
        let id_b = get_ref(&mut txn, &b).unwrap().unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(get_record(&mut txn, id_a).unwrap().unwrap().count, 2);
        // b's original record was released and dropped.
        assert_eq!(all_records(&mut txn).unwrap().len(), 1);
        txn.commit().unwrap();
    }

    #[test]
    fn join_skips_nodes_already_sharing() {
        let store = Store::new();
        let mut txn = store.begin();
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        set_perm(&mut txn, &a, &notify_perm()).unwrap();
        join_perm(&mut txn, &a, &[b.clone()], None).unwrap();
        join_perm(&mut txn, &a, &[b.clone(), a.clone()], None).unwrap();

        let id_a = get_ref(&mut txn, &a).unwrap().unwrap();
        assert_eq!(get_record(&mut txn, id_a).unwrap().unwrap().count, 2);
        txn.commit().unwrap();
    }

    #[test]
    fn split_clone_repoints_and_drains_old_record() {
        let store = Store::new();
        let mut txn = store.begin();
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        set_perm(&mut txn, &a, &notify_perm()).unwrap();
        join_perm(&mut txn, &a, &[b.clone()], None).unwrap();

        set_perm_for_all(&mut txn, &[a.clone()], &notify_perm()).unwrap();
        let id_a = get_ref(&mut txn, &a).unwrap().unwrap();
        let id_b = get_ref(&mut txn, &b).unwrap().unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(get_record(&mut txn, id_a).unwrap().unwrap().count, 1);
        assert_eq!(get_record(&mut txn, id_b).unwrap().unwrap().count, 1);
        txn.commit().unwrap();
    }

    #[test]
    fn unset_last_reference_deletes_record() {
        let store = Store::new();
        let mut txn = store.begin();
        let a = NodeId::from("a");
        set_perm(&mut txn, &a, &notify_perm()).unwrap();
        unset_perm(&mut txn, &a).unwrap();
        assert!(get_perm(&mut txn, &a).unwrap().is_none());
        assert!(all_records(&mut txn).unwrap().is_empty());
        // Second unset is a no-op.
        unset_perm(&mut txn, &a).unwrap();
        txn.commit().unwrap();
    }
}
