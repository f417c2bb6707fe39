//! Shared cancellation flag observed cooperatively by every worker loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the run-wide stop flag.
///
/// Single writer (the coordinator calls [`StopSignal::trigger`]), many readers
/// (workers poll [`StopSignal::is_set`] between work bursts). The flag is
/// monotonic: once set it stays set for the lifetime of the run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Release ordering so everything written before the
    /// trigger is visible to a worker that observes it.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Acquire-load check, cheap enough to sit inside hot worker loops.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
