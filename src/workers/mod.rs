//! Stress workers: independent, cancellable load generators.
//!
//! Each worker runs on a dedicated OS thread, shares nothing with its peers
//! except the [`StopSignal`], and reports anomalies upward as [`FailureEvent`]s
//! over a channel owned by the coordinator.

pub mod cpu;
pub mod disk;
pub mod kernel;
pub mod ram;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::stop::StopSignal;

/// Which subsystem a worker stresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    Cpu,
    Ram,
    Disk,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerKind::Cpu => write!(f, "cpu"),
            WorkerKind::Ram => write!(f, "ram"),
            WorkerKind::Disk => write!(f, "disk"),
        }
    }
}

/// Classification of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Deterministic numeric kernel produced a different result for the same
    /// inputs (miscomputation).
    NumericInstability,
    /// Read-back or checksum disagreement (RAM or disk contents changed
    /// underneath us).
    IntegrityMismatch,
    /// RAM worker could not secure its requested memory budget.
    AllocationFailure,
    /// I/O error, or a worker that died without a clean stop.
    IoFailure,
}

/// Immutable record of a detected anomaly. Appended to the run's failure log
/// and pushed to subscribers; never mutated afterward.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub source_kind: WorkerKind,
    pub source_id: u32,
    pub kind: FailureKind,
    pub detail: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// What a CPU worker does after its kernel reports instability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InstabilityPolicy {
    /// Record the event and keep burning (default: a stress test should
    /// report instability, not hide the load that provokes it).
    #[default]
    Continue,
    /// Record the event and stop this one worker; the rest of the run is
    /// unaffected.
    StopWorker,
}

/// Per-worker context handed to the worker thread at spawn.
#[derive(Clone)]
pub struct WorkerContext {
    pub kind: WorkerKind,
    pub id: u32,
    pub stop: StopSignal,
    events: Sender<FailureEvent>,
    ops: Arc<AtomicU64>,
}

impl WorkerContext {
    pub fn new(
        kind: WorkerKind,
        id: u32,
        stop: StopSignal,
        events: Sender<FailureEvent>,
        ops: Arc<AtomicU64>,
    ) -> Self {
        Self {
            kind,
            id,
            stop,
            events,
            ops,
        }
    }

    /// Emit a failure event. A send error means the coordinator is already
    /// gone, which only happens during teardown; the event is dropped.
    pub fn emit(&self, kind: FailureKind, detail: impl Into<String>) {
        let event = FailureEvent {
            source_kind: self.kind,
            source_id: self.id,
            kind,
            detail: detail.into(),
            at: chrono::Utc::now(),
        };
        let _ = self.events.send(event);
    }

    /// Bump the progress counter surfaced through status snapshots.
    pub fn count_ops(&self, n: u64) {
        self.ops.fetch_add(n, Ordering::Relaxed);
    }
}
