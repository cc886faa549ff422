//! Progress reporting and cancellation for scans.
//!
//! The scan loop reports once per chunk, after the chunk has been fully
//! processed, and checks for cancellation before reading the next chunk. It
//! never pauses mid-chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// `round(offset / max_scan_bytes * 100)`, clamped to 100
    pub percent: u8,
    /// Code findings accepted so far
    pub found_count: usize,
    /// Absolute offset one past the last processed byte
    pub offset: u64,
}

impl Progress {
    /// Computes the update for a scan that has processed `offset` bytes
    pub fn new(offset: u64, max_scan_bytes: u64, found_count: usize) -> Self {
        let percent = if max_scan_bytes == 0 {
            100
        } else {
            ((offset as f64 / max_scan_bytes as f64) * 100.0)
                .round()
                .min(100.0) as u8
        };

        Self {
            percent,
            found_count,
            offset,
        }
    }
}

/// Receives progress updates from a running scan
pub trait ProgressReporter: Send {
    /// Called after each chunk has been processed
    fn on_progress(&mut self, progress: Progress) {
        let _ = progress;
    }
}

/// A reporter that discards all updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {}

/// A reporter that keeps every update
#[derive(Debug, Default, Clone)]
pub struct ProgressLog {
    /// Updates in the order they were reported
    pub updates: Vec<Progress>,
}

impl ProgressReporter for ProgressLog {
    fn on_progress(&mut self, progress: Progress) {
        self.updates.push(progress);
    }
}

/// Shared flag used to request cancellation of a scan
#[derive(Debug, Default, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Honored at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
