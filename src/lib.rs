//! stressforge -- configurable CPU/RAM/disk stress-test harness.
//!
//! This crate provides the core library: cancellable per-subsystem load
//! generators, the run coordinator that launches them against a wall-clock
//! deadline, and failure-event aggregation for instability reporting.

pub mod config;
pub mod coordinator;
pub mod stop;
pub mod telemetry;
pub mod workers;

pub use config::StressConfig;
pub use coordinator::{Coordinator, RunReport, RunSnapshot, RunStatus, StateError};
pub use workers::{FailureEvent, FailureKind, WorkerKind};

use anyhow::Result;

/// Run a single stress test to completion and return its report.
///
/// Convenience wrapper over the [`Coordinator`] control surface for callers
/// that do not need mid-run polling or early stop.
pub fn run_to_completion(config: StressConfig) -> Result<RunReport> {
    let coordinator = Coordinator::new();
    if let Some(thermal) = telemetry::SysfsThermal::detect() {
        coordinator.attach_temperature(std::sync::Arc::new(thermal));
    }
    coordinator.configure(config)?;
    coordinator.start()?;
    coordinator
        .wait()
        .ok_or_else(|| anyhow::anyhow!("run ended without a report"))
}
