//! Progress reporting for imports.
//!
//! [`ProgressCallback`] decouples the ingestor from any rendering backend.
//! Worker threads report through it directly, so implementations must be
//! `Send + Sync`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives progress updates from a running import.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of elements in the current file.
    fn set_total(&self, total: u64);

    /// Advances progress by `delta` elements.
    fn inc(&self, delta: u64);

    /// Updates the message shown alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Marks the current file as finished with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Reports progress through the `log` facade every `every` elements.
pub struct LogProgress {
    every: u64,
    total: AtomicU64,
    position: AtomicU64,
}

impl LogProgress {
    /// Creates a reporter that logs once per `every` elements.
    #[must_use]
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            total: AtomicU64::new(0),
            position: AtomicU64::new(0),
        }
    }
}

impl ProgressCallback for LogProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.position.store(0, Ordering::Relaxed);
    }

    fn inc(&self, delta: u64) {
        let before = self.position.fetch_add(delta, Ordering::Relaxed);
        let after = before + delta;
        if after / self.every > before / self.every {
            log::info!(
                "  {after}/{} features processed",
                self.total.load(Ordering::Relaxed)
            );
        }
    }

    fn set_message(&self, msg: String) {
        log::info!("{msg}");
    }

    fn finish(&self, msg: String) {
        log::info!("{msg}");
    }
}
