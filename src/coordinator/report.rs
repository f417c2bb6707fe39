//! Final run summary handed to the control surface after teardown.

use serde::Serialize;
use uuid::Uuid;

use crate::workers::{FailureEvent, WorkerKind};

/// Workers launched per subsystem for one run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LaunchCounts {
    pub cpu: usize,
    pub ram: usize,
    pub disk: usize,
}

impl LaunchCounts {
    pub fn tally(kinds: &[WorkerKind]) -> Self {
        let mut counts = Self::default();
        for kind in kinds {
            match kind {
                WorkerKind::Cpu => counts.cpu += 1,
                WorkerKind::Ram => counts.ram += 1,
                WorkerKind::Disk => counts.disk += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.cpu + self.ram + self.disk
    }
}

/// Aggregate outcome of a completed run. An all-clear run carries an empty
/// failure list rather than omitting the section.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_secs: f64,
    pub workers_launched: LaunchCounts,
    pub failures: Vec<FailureEvent>,
    pub max_cpu_temp_c: Option<f64>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable summary for the CLI.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("\n=== Stress Run Report ===\n");
        out.push_str(&format!("Run:        {}\n", self.run_id));
        out.push_str(&format!("Started:    {}\n", self.started_at.to_rfc3339()));
        out.push_str(&format!("Elapsed:    {:.1}s\n", self.elapsed_secs));
        out.push_str(&format!(
            "Workers:    {} cpu, {} ram, {} disk\n",
            self.workers_launched.cpu, self.workers_launched.ram, self.workers_launched.disk
        ));
        if let Some(t) = self.max_cpu_temp_c {
            out.push_str(&format!("Max temp:   {t:.1} C\n"));
        }
        if self.failures.is_empty() {
            out.push_str("Failures:   none detected\n");
        } else {
            out.push_str(&format!("Failures:   {}\n", self.failures.len()));
            for f in &self.failures {
                out.push_str(&format!(
                    " - [{}] {}-{}: {:?}: {}\n",
                    f.at.to_rfc3339(),
                    f.source_kind,
                    f.source_id,
                    f.kind,
                    f.detail
                ));
            }
        }
        out.push_str("=========================\n");
        out
    }
}
