//! Backend statistics.
//!
//! Counters are atomic and may be read while operations are in progress.

use std::sync::atomic::{AtomicU64, Ordering};

/// Backend statistics and metrics.
#[derive(Debug, Default)]
pub struct BackendStats {
    /// Engine transactions opened by the transaction manager.
    transactions_started: AtomicU64,
    /// Engine transactions committed by the transaction manager.
    transactions_committed: AtomicU64,
    /// Engine transactions aborted by the transaction manager.
    transactions_aborted: AtomicU64,
    /// Requests refused with "unwilling to perform".
    unwilling: AtomicU64,
    /// Cursor walks over an index.
    index_scans: AtomicU64,
    /// Unique-index point lookups.
    point_lookups: AtomicU64,
    /// Scans abandoned for exceeding the hard scan cap.
    scan_limit_fallbacks: AtomicU64,
    /// Scans cut short by the size-limit cap.
    partial_scans: AtomicU64,
    /// Entries added.
    entries_added: AtomicU64,
    /// Entries modified.
    entries_modified: AtomicU64,
    /// Entries deleted.
    entries_deleted: AtomicU64,
}

impl BackendStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unwilling(&self) {
        self.unwilling.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_index_scan(&self) {
        self.index_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_point_lookup(&self) {
        self.point_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan_limit_fallback(&self) {
        self.scan_limit_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_partial_scan(&self) {
        self.partial_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_entry_added(&self) {
        self.entries_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_entry_modified(&self) {
        self.entries_modified.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_entry_deleted(&self) {
        self.entries_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            unwilling: self.unwilling.load(Ordering::Relaxed),
            index_scans: self.index_scans.load(Ordering::Relaxed),
            point_lookups: self.point_lookups.load(Ordering::Relaxed),
            scan_limit_fallbacks: self.scan_limit_fallbacks.load(Ordering::Relaxed),
            partial_scans: self.partial_scans.load(Ordering::Relaxed),
            entries_added: self.entries_added.load(Ordering::Relaxed),
            entries_modified: self.entries_modified.load(Ordering::Relaxed),
            entries_deleted: self.entries_deleted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`BackendStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Engine transactions opened.
    pub transactions_started: u64,
    /// Engine transactions committed.
    pub transactions_committed: u64,
    /// Engine transactions aborted.
    pub transactions_aborted: u64,
    /// Requests refused with "unwilling to perform".
    pub unwilling: u64,
    /// Cursor walks over an index.
    pub index_scans: u64,
    /// Unique-index point lookups.
    pub point_lookups: u64,
    /// Scans abandoned for exceeding the hard scan cap.
    pub scan_limit_fallbacks: u64,
    /// Scans cut short by the size-limit cap.
    pub partial_scans: u64,
    /// Entries added.
    pub entries_added: u64,
    /// Entries modified.
    pub entries_modified: u64,
    /// Entries deleted.
    pub entries_deleted: u64,
}
