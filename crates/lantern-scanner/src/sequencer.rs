//! Per-scan monotonic event sequencing.
//!
//! Counters live only in memory. After a restart the orchestrator seeds each
//! scan's counter from the highest persisted sequence, so numbering continues
//! without gaps or repeats.

use dashmap::DashMap;
use lantern_core::ScanId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing sequence numbers per scan.
#[derive(Debug, Default)]
pub struct EventSequencer {
    counters: DashMap<ScanId, AtomicU64>,
}

impl EventSequencer {
    /// Create a sequencer with no counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the scan's counter. The first call returns 1.
    pub fn next_sequence(&self, scan_id: &ScanId) -> u64 {
        if let Some(counter) = self.counters.get(scan_id) {
            return counter.fetch_add(1, Ordering::SeqCst) + 1;
        }
        self.counters
            .entry(scan_id.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    /// Raise the scan's counter to at least `floor`; the next sequence is then above it.
    pub fn seed(&self, scan_id: &ScanId, floor: u64) {
        self.counters
            .entry(scan_id.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_max(floor, Ordering::SeqCst);
    }

    /// Last sequence handed out for the scan, 0 if none.
    #[must_use]
    pub fn current(&self, scan_id: &ScanId) -> u64 {
        self.counters
            .get(scan_id)
            .map_or(0, |counter| counter.load(Ordering::SeqCst))
    }

    /// Forget the scan's counter.
    pub fn reset_sequence(&self, scan_id: &ScanId) {
        self.counters.remove(scan_id);
    }

    /// Forget every counter.
    pub fn clear(&self) {
        self.counters.clear();
    }
}
