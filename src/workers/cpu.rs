//! CPU worker: runs a deterministic numeric kernel flat-out until stopped.

use tracing::{debug, info, warn};

use crate::config::CpuConfig;
use crate::workers::kernel::Kernel;
use crate::workers::{FailureKind, InstabilityPolicy, WorkerContext};

/// Worker entry point. Pins to an assigned core when the config provides one,
/// then burns the kernel in a tight loop. The only voluntary yield point is
/// the stop check between bursts; everything else saturates the core on
/// purpose.
pub fn run(ctx: &WorkerContext, cfg: &CpuConfig) {
    if let Some(core) = cfg.core_for(ctx.id) {
        pin_to_core(ctx.id, core);
    }

    let mut kernel = Kernel::resolve(cfg.kernel, u64::from(ctx.id), cfg.matrix_size);
    debug!(worker = ctx.id, kernel = ?cfg.kernel, "cpu worker entering burn loop");
    run_with_kernel(ctx, &mut kernel, cfg.on_instability);
}

/// Burn loop over an already-built kernel. Split out so tests can feed a
/// kernel with a perturbed comparison value.
pub(crate) fn run_with_kernel(
    ctx: &WorkerContext,
    kernel: &mut Kernel,
    policy: InstabilityPolicy,
) {
    while !ctx.stop.is_set() {
        match kernel.step() {
            Ok(()) => ctx.count_ops(1),
            Err(fault) => {
                warn!(worker = ctx.id, %fault, "numeric instability detected");
                ctx.emit(FailureKind::NumericInstability, fault.to_string());
                if policy == InstabilityPolicy::StopWorker {
                    info!(worker = ctx.id, "stopping worker after instability");
                    break;
                }
            }
        }
    }
    debug!(worker = ctx.id, "cpu worker exiting");
}

#[cfg(target_os = "linux")]
fn pin_to_core(worker_id: u32, core: usize) {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    let pinned = set
        .set(core)
        .and_then(|_| sched_setaffinity(Pid::from_raw(0), &set));
    match pinned {
        Ok(()) => info!(worker = worker_id, core, "pinned cpu worker"),
        Err(e) => warn!(worker = worker_id, core, error = %e, "core pinning failed; running unpinned"),
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(worker_id: u32, core: usize) {
    warn!(
        worker = worker_id,
        core, "core pinning unsupported on this platform; running unpinned"
    );
}
