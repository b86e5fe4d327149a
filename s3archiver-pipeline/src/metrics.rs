//! Per-stage atomic counters, mirroring how the rest of the agent observes itself: no locks on
//! the hot path, a point-in-time snapshot for anything that wants to report or log them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub entries_queued: AtomicU64,
    pub entries_written: AtomicU64,
    pub empty_payloads_dropped: AtomicU64,
    pub rotations: AtomicU64,
    pub rotation_exhausted: AtomicU64,
    pub compressions_succeeded: AtomicU64,
    pub compressions_failed: AtomicU64,
    pub compression_retries: AtomicU64,
    pub uploads_succeeded: AtomicU64,
    pub uploads_failed: AtomicU64,
    pub upload_retries: AtomicU64,
    pub archives_deleted: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_queued: self.entries_queued.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            empty_payloads_dropped: self.empty_payloads_dropped.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            rotation_exhausted: self.rotation_exhausted.load(Ordering::Relaxed),
            compressions_succeeded: self.compressions_succeeded.load(Ordering::Relaxed),
            compressions_failed: self.compressions_failed.load(Ordering::Relaxed),
            compression_retries: self.compression_retries.load(Ordering::Relaxed),
            uploads_succeeded: self.uploads_succeeded.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            upload_retries: self.upload_retries.load(Ordering::Relaxed),
            archives_deleted: self.archives_deleted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub entries_queued: u64,
    pub entries_written: u64,
    pub empty_payloads_dropped: u64,
    pub rotations: u64,
    pub rotation_exhausted: u64,
    pub compressions_succeeded: u64,
    pub compressions_failed: u64,
    pub compression_retries: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub upload_retries: u64,
    pub archives_deleted: u64,
}
