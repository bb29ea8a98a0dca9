use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters kept by the engine. All counters are monotonic
/// and thread-safe.
#[derive(Debug, Default)]
pub struct GraphMetrics {
    pub(crate) vertex_upserts: AtomicU64,
    pub(crate) vertex_removals: AtomicU64,
    pub(crate) links: AtomicU64,
    pub(crate) unlinks: AtomicU64,
    pub(crate) merges: AtomicU64,
    pub(crate) splits: AtomicU64,
    pub(crate) traversal_visits: AtomicU64,
}

impl GraphMetrics {
    pub(crate) fn record_traversal(&self, visited: usize) {
        self.traversal_visits
            .fetch_add(visited as u64, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            vertex_upserts: self.vertex_upserts.load(Ordering::Relaxed),
            vertex_removals: self.vertex_removals.load(Ordering::Relaxed),
            links: self.links.load(Ordering::Relaxed),
            unlinks: self.unlinks.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            traversal_visits: self.traversal_visits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`GraphMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Vertices created or refreshed.
    pub vertex_upserts: u64,
    /// Vertices deleted.
    pub vertex_removals: u64,
    /// Edges inserted.
    pub links: u64,
    /// Edges removed.
    pub unlinks: u64,
    /// Permission merges caused by linking two components.
    pub merges: u64,
    /// Permission clones caused by component splits.
    pub splits: u64,
    /// Vertices visited across all traversals.
    pub traversal_visits: u64,
}
