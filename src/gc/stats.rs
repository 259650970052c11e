//! GC counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cumulative GC counters, updated lock-free by the collector
#[derive(Debug, Default)]
pub struct GcStats {
    passes: AtomicU64,
    failed_passes: AtomicU64,
    sections_collected: AtomicU64,
    segments_scanned: AtomicU64,
    node_blocks_migrated: AtomicU64,
    data_blocks_migrated: AtomicU64,
    stale_entries_skipped: AtomicU64,
    orphan_holes_punched: AtomicU64,
    writeback_batches: AtomicU64,
    writeback_pages: AtomicU64,
    last_pass_duration_us: AtomicU64,
}

/// Point-in-time copy of [`GcStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStatsSnapshot {
    /// Section collection attempts
    pub passes: u64,
    /// Attempts that returned an error
    pub failed_passes: u64,
    /// Sections fully processed
    pub sections_collected: u64,
    /// Segments whose summary was walked
    pub segments_scanned: u64,
    /// Node blocks dirtied for migration
    pub node_blocks_migrated: u64,
    /// Data blocks dirtied for migration
    pub data_blocks_migrated: u64,
    /// Summary entries that no longer matched live metadata
    pub stale_entries_skipped: u64,
    /// Orphan data blocks released instead of moved
    pub orphan_holes_punched: u64,
    /// Batches handed to writeback
    pub writeback_batches: u64,
    /// Pages handed to writeback
    pub writeback_pages: u64,
    /// Duration of the last pass in microseconds
    pub last_pass_duration_us: u64,
}

impl GcStatsSnapshot {
    /// Blocks migrated of either kind
    pub fn blocks_migrated(&self) -> u64 {
        self.node_blocks_migrated + self.data_blocks_migrated
    }

    /// Fraction of passes that failed
    pub fn failure_rate(&self) -> f64 {
        if self.passes == 0 {
            return 0.0;
        }
        self.failed_passes as f64 / self.passes as f64
    }
}

impl GcStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass(&self, ok: bool, duration: Duration) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.sections_collected.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_passes.fetch_add(1, Ordering::Relaxed);
        }
        self.last_pass_duration_us.store(
            u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    pub(crate) fn record_segment_scanned(&self) {
        self.segments_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_node_migrated(&self) {
        self.node_blocks_migrated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_data_migrated(&self) {
        self.data_blocks_migrated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale(&self) {
        self.stale_entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphan_hole(&self) {
        self.orphan_holes_punched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writeback(&self, pages: usize) {
        self.writeback_batches.fetch_add(1, Ordering::Relaxed);
        self.writeback_pages
            .fetch_add(pages as u64, Ordering::Relaxed);
    }

    /// Copy the counters
    pub fn snapshot(&self) -> GcStatsSnapshot {
        GcStatsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            failed_passes: self.failed_passes.load(Ordering::Relaxed),
            sections_collected: self.sections_collected.load(Ordering::Relaxed),
            segments_scanned: self.segments_scanned.load(Ordering::Relaxed),
            node_blocks_migrated: self.node_blocks_migrated.load(Ordering::Relaxed),
            data_blocks_migrated: self.data_blocks_migrated.load(Ordering::Relaxed),
            stale_entries_skipped: self.stale_entries_skipped.load(Ordering::Relaxed),
            orphan_holes_punched: self.orphan_holes_punched.load(Ordering::Relaxed),
            writeback_batches: self.writeback_batches.load(Ordering::Relaxed),
            writeback_pages: self.writeback_pages.load(Ordering::Relaxed),
            last_pass_duration_us: self.last_pass_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.passes,
            &self.failed_passes,
            &self.sections_collected,
            &self.segments_scanned,
            &self.node_blocks_migrated,
            &self.data_blocks_migrated,
            &self.stale_entries_skipped,
            &self.orphan_holes_punched,
            &self.writeback_batches,
            &self.writeback_pages,
            &self.last_pass_duration_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
