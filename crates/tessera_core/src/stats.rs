//! Bridge statistics.
//!
//! Counters are atomic and may be read while operations run. They are
//! observational only: nothing in the bridge branches on them.
//!
//! ```rust,ignore
//! let bridge = StorageBridge::init(Config::in_memory())?;
//! // ... searches and writes ...
//! let stats = bridge.stats().snapshot();
//! println!("index probes: {}", stats.index_probes);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Bridge counters.
#[derive(Debug, Default)]
pub struct BridgeStats {
    searches: AtomicU64,
    index_probes: AtomicU64,
    full_scans: AtomicU64,
    hash_lookups: AtomicU64,
    rows_written: AtomicU64,
    rows_skipped: AtomicU64,
    rows_deleted: AtomicU64,
    write_retries: AtomicU64,
    attributes_created: AtomicU64,
    audit_entries: AtomicU64,
    audit_failures: AtomicU64,
    audit_pruned: AtomicU64,
    prune_passes: AtomicU64,
    prune_pauses: AtomicU64,
    environments_opened: AtomicU64,
}

impl BridgeStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_search(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_index_probe(&self) {
        self.index_probes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_full_scan(&self) {
        self.full_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hash_lookups(&self, count: u64) {
        self.hash_lookups.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, written: u64, skipped: u64) {
        self.rows_written.fetch_add(written, Ordering::Relaxed);
        self.rows_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self, deleted: u64) {
        self.rows_deleted.fetch_add(deleted, Ordering::Relaxed);
    }

    pub(crate) fn record_write_retries(&self, rows: u64) {
        self.write_retries.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_attributes_created(&self, count: u64) {
        self.attributes_created.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_audit_entry(&self) {
        self.audit_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_audit_failure(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_audit_pruned(&self, count: u64) {
        self.audit_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_prune_pass(&self) {
        self.prune_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prune_pause(&self) {
        self.prune_pauses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_environment_opened(&self) {
        self.environments_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Searches executed.
    pub fn searches(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    /// Secondary-index probes.
    pub fn index_probes(&self) -> u64 {
        self.index_probes.load(Ordering::Relaxed)
    }

    /// Probes that had to walk a whole index.
    ///
    /// High counts point at suffix or substring searches.
    pub fn full_scans(&self) -> u64 {
        self.full_scans.load(Ordering::Relaxed)
    }

    /// Primary-key point lookups.
    pub fn hash_lookups(&self) -> u64 {
        self.hash_lookups.load(Ordering::Relaxed)
    }

    /// Rows written.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Rows skipped by writes.
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped.load(Ordering::Relaxed)
    }

    /// Rows deleted.
    pub fn rows_deleted(&self) -> u64 {
        self.rows_deleted.load(Ordering::Relaxed)
    }

    /// Row writes resubmitted because the row changed under them.
    pub fn write_retries(&self) -> u64 {
        self.write_retries.load(Ordering::Relaxed)
    }

    /// Attributes created lazily or explicitly.
    pub fn attributes_created(&self) -> u64 {
        self.attributes_created.load(Ordering::Relaxed)
    }

    /// Audit entries appended.
    pub fn audit_entries(&self) -> u64 {
        self.audit_entries.load(Ordering::Relaxed)
    }

    /// Audit appends that failed and were only logged.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    /// Audit entries removed by retention.
    pub fn audit_pruned(&self) -> u64 {
        self.audit_pruned.load(Ordering::Relaxed)
    }

    /// Audit prune passes that removed entries.
    pub fn prune_passes(&self) -> u64 {
        self.prune_passes.load(Ordering::Relaxed)
    }

    /// Pauses taken between audit prune passes.
    pub fn prune_pauses(&self) -> u64 {
        self.prune_pauses.load(Ordering::Relaxed)
    }

    /// Environments opened.
    pub fn environments_opened(&self) -> u64 {
        self.environments_opened.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            searches: self.searches(),
            index_probes: self.index_probes(),
            full_scans: self.full_scans(),
            hash_lookups: self.hash_lookups(),
            rows_written: self.rows_written(),
            rows_skipped: self.rows_skipped(),
            rows_deleted: self.rows_deleted(),
            write_retries: self.write_retries(),
            attributes_created: self.attributes_created(),
            audit_entries: self.audit_entries(),
            audit_failures: self.audit_failures(),
            audit_pruned: self.audit_pruned(),
            prune_passes: self.prune_passes(),
            prune_pauses: self.prune_pauses(),
            environments_opened: self.environments_opened(),
        }
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct StatsSnapshot {
    /// Searches executed.
    pub searches: u64,
    /// Secondary-index probes.
    pub index_probes: u64,
    /// Probes that walked a whole index.
    pub full_scans: u64,
    /// Primary-key point lookups.
    pub hash_lookups: u64,
    /// Rows written.
    pub rows_written: u64,
    /// Rows skipped by writes.
    pub rows_skipped: u64,
    /// Rows deleted.
    pub rows_deleted: u64,
    /// Row writes resubmitted after a concurrent change.
    pub write_retries: u64,
    /// Attributes created.
    pub attributes_created: u64,
    /// Audit entries appended.
    pub audit_entries: u64,
    /// Failed audit appends.
    pub audit_failures: u64,
    /// Audit entries pruned.
    pub audit_pruned: u64,
    /// Audit prune passes.
    pub prune_passes: u64,
    /// Pauses between audit prune passes.
    pub prune_pauses: u64,
    /// Environments opened.
    pub environments_opened: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = BridgeStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = BridgeStats::new();
        stats.record_search();
        stats.record_index_probe();
        stats.record_index_probe();
        stats.record_hash_lookups(5);
        stats.record_write(3, 1);

        let snap = stats.snapshot();
        assert_eq!(snap.searches, 1);
        assert_eq!(snap.index_probes, 2);
        assert_eq!(snap.hash_lookups, 5);
        assert_eq!(snap.rows_written, 3);
        assert_eq!(snap.rows_skipped, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(BridgeStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_audit_entry();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.audit_entries(), 800);
    }
}
