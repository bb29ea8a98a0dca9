//! Transactional key-value store seam.
//!
//! The engine above this module only assumes the contract expressed
//! here: snapshot reads inside one transaction, lexicographically
//! ordered keys, prefix scans, and first-committer-wins conflict
//! detection at commit. The in-memory engine below implements that
//! contract and is what the crate's own tests run against; a durable
//! engine drops in by offering the same surface.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, warn};

/// The state of a store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Transaction is active and accepting operations.
    Active,
    /// Transaction committed successfully.
    Committed,
    /// Transaction was rolled back or lost a conflict.
    RolledBack,
}

/// Failures produced by the store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction committed an overlapping change first.
    /// Callers retry the whole operation on a fresh transaction.
    #[error("transaction conflict ({0} contended keys)")]
    Conflict(usize),
    /// Operation on a transaction that already committed or rolled
    /// back.
    #[error("transaction is no longer active")]
    Inactive,
}

#[derive(Debug, Default)]
struct StoreInner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Commit sequence that last touched each key (including deletes).
    versions: FxHashMap<Vec<u8>, u64>,
    commit_seq: u64,
}

/// Shared transactional store handle.
#[derive(Debug, Default)]
pub struct Store {
    inner: Mutex<StoreInner>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a transaction over a snapshot of the current state.
    pub fn begin(&self) -> StoreTxn<'_> {
        let inner = self.inner.lock();
        StoreTxn {
            store: self,
            snapshot: inner.data.clone(),
            snapshot_seq: inner.commit_seq,
            reads: FxHashSet::default(),
            prefix_reads: Vec::new(),
            writes: BTreeMap::new(),
            state: TxState::Active,
        }
    }
}

/// A transaction: snapshot view plus buffered writes.
///
/// Writes are invisible to other transactions until [`commit`]
/// succeeds. Dropping an active transaction discards its writes.
///
/// [`commit`]: StoreTxn::commit
pub struct StoreTxn<'s> {
    store: &'s Store,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    snapshot_seq: u64,
    reads: FxHashSet<Vec<u8>>,
    prefix_reads: Vec<Vec<u8>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    state: TxState,
}

impl StoreTxn<'_> {
    /// Current transaction state.
    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> Result<(), StoreError> {
        if self.state != TxState::Active {
            return Err(StoreError::Inactive);
        }
        Ok(())
    }

    /// Reads a key through this transaction's view.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_active()?;
        self.reads.insert(key.to_vec());
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    /// Buffers a write of `key`.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.writes.insert(key.to_vec(), Some(value));
        Ok(())
    }

    /// Buffers a deletion of `key`.
    pub fn del(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.ensure_active()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    /// Returns all `(key, value)` pairs under `prefix` in ascending key
    /// order, with this transaction's writes overlaid.
    pub fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.ensure_active()?;
        self.prefix_reads.push(prefix.to_vec());
        let range = prefix_range(prefix);
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .snapshot
            .range::<[u8], _>((as_slice_bound(&range.0), as_slice_bound(&range.1)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, pending) in self
            .writes
            .range::<[u8], _>((as_slice_bound(&range.0), as_slice_bound(&range.1)))
        {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Commits buffered writes atomically.
    ///
    /// Fails with [`StoreError::Conflict`] when any key this
    /// transaction read, wrote, or scanned was committed by another
    /// transaction after this one's snapshot was taken.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.ensure_active()?;
        let mut inner = self.store.inner.lock();

        let mut contended = 0usize;
        for key in self.writes.keys() {
            if inner.versions.get(key).is_some_and(|v| *v > self.snapshot_seq) {
                contended += 1;
            }
        }
        for key in self.reads.iter().filter(|k| !self.writes.contains_key(*k)) {
            if inner.versions.get(key).is_some_and(|v| *v > self.snapshot_seq) {
                contended += 1;
            }
        }
        for prefix in &self.prefix_reads {
            for (key, version) in inner.versions.iter() {
                if *version > self.snapshot_seq
                    && key.starts_with(prefix)
                    && !self.reads.contains(key)
                    && !self.writes.contains_key(key)
                {
                    contended += 1;
                }
            }
        }
        if contended > 0 {
            self.state = TxState::RolledBack;
            warn!(contended, "transaction lost a commit race, rolling back");
            return Err(StoreError::Conflict(contended));
        }

        if !self.writes.is_empty() {
            inner.commit_seq += 1;
            let seq = inner.commit_seq;
            let writes = std::mem::take(&mut self.writes);
            let written = writes.len();
            for (key, pending) in writes {
                match pending {
                    Some(value) => {
                        inner.data.insert(key.clone(), value);
                    }
                    None => {
                        inner.data.remove(&key);
                    }
                }
                inner.versions.insert(key, seq);
            }
            debug!(seq, written, "transaction committed");
        }
        self.state = TxState::Committed;
        Ok(())
    }

    /// Discards buffered writes.
    pub fn rollback(mut self) {
        self.state = TxState::RolledBack;
        debug!("transaction rolled back");
    }
}

impl Drop for StoreTxn<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active && !self.writes.is_empty() {
            warn!(
                pending = self.writes.len(),
                "transaction dropped without commit; writes discarded"
            );
        }
    }
}

fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let upper = {
        let mut up = prefix.to_vec();
        loop {
            match up.last_mut() {
                None => break None,
                Some(&mut 0xFF) => {
                    up.pop();
                }
                Some(last) => {
                    *last += 1;
                    break Some(up);
                }
            }
        }
    };
    let end = match upper {
        Some(up) => Bound::Excluded(up),
        None => Bound::Unbounded,
    };
    (Bound::Included(prefix.to_vec()), end)
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
