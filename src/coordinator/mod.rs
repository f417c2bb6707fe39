//! Run coordinator: owns the stop signal, spawns the worker population,
//! enforces the wall-clock deadline, and aggregates failure signals.

pub mod report;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, StressConfig};
use crate::stop::StopSignal;
use crate::telemetry::TemperatureProvider;
use crate::workers::{self, FailureEvent, FailureKind, WorkerContext, WorkerKind};

pub use report::{LaunchCounts, RunReport};

/// Invalid control-surface call for the coordinator's current state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("coordinator is {current}, not idle")]
    NotIdle { current: RunStatus },

    #[error("no configuration supplied; call configure() first")]
    NotConfigured,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn monitor thread: {0}")]
    MonitorSpawn(String),
}

/// Coordinator state machine. `StoppingGrace` covers the bounded window
/// between the stop signal and forced teardown; the machine always returns to
/// `Idle` and is reusable for subsequent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Idle,
    Running,
    StoppingGrace,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::StoppingGrace => write!(f, "stopping"),
        }
    }
}

/// Liveness of a single spawned worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Running,
    Stopped,
    Failed,
}

/// Point-in-time view of one worker slot.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub kind: WorkerKind,
    pub id: u32,
    pub state: WorkerState,
    pub reason: Option<String>,
    pub ops: u64,
}

/// Point-in-time view of the whole run, for polling control surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub remaining_secs: u64,
    pub workers: Vec<WorkerSnapshot>,
    pub live_workers: usize,
    pub failures: Vec<FailureEvent>,
}

type FailureCallback = Box<dyn Fn(&FailureEvent) + Send + 'static>;

/// Coordinator-private worker slot. The coordinator is the only component
/// that may observe or terminate the underlying thread.
struct Slot {
    kind: WorkerKind,
    id: u32,
    state: WorkerState,
    reason: Option<String>,
    ops: Arc<AtomicU64>,
}

struct ActiveRun {
    stop: StopSignal,
    deadline: Instant,
    slots: Arc<Mutex<Vec<Slot>>>,
    failures: Arc<Mutex<Vec<FailureEvent>>>,
    monitor: Option<JoinHandle<()>>,
}

struct Control {
    config: Option<StressConfig>,
    status: RunStatus,
    run: Option<ActiveRun>,
    last_report: Option<RunReport>,
}

struct Shared {
    control: Mutex<Control>,
    subscribers: Mutex<Vec<FailureCallback>>,
    temperature: Mutex<Option<Arc<dyn TemperatureProvider>>>,
}

/// The run coordinator. Cheap to clone; all clones share one state machine.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    config: None,
                    status: RunStatus::Idle,
                    run: None,
                    last_report: None,
                }),
                subscribers: Mutex::new(Vec::new()),
                temperature: Mutex::new(None),
            }),
        }
    }

    /// Attach an optional temperature collaborator. Its absence is treated as
    /// permanently unavailable; the coordinator never waits on it.
    pub fn attach_temperature(&self, provider: Arc<dyn TemperatureProvider>) {
        *self.shared.temperature.lock().unwrap() = Some(provider);
    }

    /// Validate and install a configuration. Only allowed while idle; the
    /// config is immutable for the duration of a run.
    pub fn configure(&self, config: StressConfig) -> Result<(), StateError> {
        let mut control = self.shared.control.lock().unwrap();
        if control.status != RunStatus::Idle {
            return Err(StateError::NotIdle {
                current: control.status,
            });
        }
        config.validate()?;
        control.config = Some(config);
        Ok(())
    }

    /// Register a push subscriber for failure events. Callbacks run on the
    /// monitor thread and must not block.
    pub fn subscribe_failures(&self, callback: impl Fn(&FailureEvent) + Send + 'static) {
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .push(Box::new(callback));
    }

    /// Start a run: spawn the configured worker population sharing one fresh
    /// stop signal, arm the deadline, transition Idle -> Running.
    pub fn start(&self) -> Result<(), StateError> {
        let mut control = self.shared.control.lock().unwrap();
        if control.status != RunStatus::Idle {
            return Err(StateError::NotIdle {
                current: control.status,
            });
        }
        let config = control.config.clone().ok_or(StateError::NotConfigured)?;
        // re-validated here so a start() after a config edit can never slip
        // past the gate
        config.validate()?;

        let run_id = Uuid::new_v4();
        let stop = StopSignal::new();
        let (events_tx, events_rx) = mpsc::channel();
        let slots = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut spawner = Spawner {
            stop: stop.clone(),
            events: events_tx,
            slots: Arc::clone(&slots),
            failures: Arc::clone(&failures),
            handles: Vec::new(),
        };

        if config.cpu.enabled {
            for id in 0..config.cpu.workers as u32 {
                let cfg = config.cpu.clone();
                spawner.spawn(WorkerKind::Cpu, id, move |ctx| workers::cpu::run(&ctx, &cfg));
            }
        }
        if config.ram.enabled {
            let cfg = config.ram.clone();
            spawner.spawn(WorkerKind::Ram, 0, move |ctx| workers::ram::run(&ctx, &cfg));
        }
        let mut disk_paths = Vec::new();
        if config.disk.enabled {
            for id in 0..config.disk.workers as u32 {
                // distinct path per worker; shared paths would read as
                // cross-worker corruption
                let path = config
                    .disk
                    .dir
                    .join(format!("stressforge-disk-{}-{id}.bin", run_id.simple()));
                disk_paths.push(path.clone());
                let cfg = config.disk.clone();
                spawner.spawn(WorkerKind::Disk, id, move |ctx| {
                    workers::disk::run(&ctx, &cfg, &path)
                });
            }
        }

        let launched = {
            let slots = slots.lock().unwrap();
            launched_counts(&slots)
        };
        info!(
            run = %run_id,
            cpu = launched.cpu,
            ram = launched.ram,
            disk = launched.disk,
            duration_secs = config.duration_secs,
            "run started"
        );

        let deadline = Instant::now() + config.duration();
        let monitor = MonitorTask {
            shared: Arc::clone(&self.shared),
            run_id,
            started_at: chrono::Utc::now(),
            started: Instant::now(),
            deadline,
            grace: config.grace(),
            stop: stop.clone(),
            events: events_rx,
            handles: spawner.handles,
            slots: Arc::clone(&slots),
            failures: Arc::clone(&failures),
            disk_paths,
            launched,
        };
        let monitor = std::thread::Builder::new()
            .name("stressforge-monitor".into())
            .spawn(move || monitor.run())
            .map_err(|e| {
                error!(error = %e, "failed to spawn monitor thread");
                // without a monitor nothing enforces the deadline; unwind the
                // workers before reporting the failure
                stop.trigger();
                StateError::MonitorSpawn(e.to_string())
            })?;

        control.run = Some(ActiveRun {
            stop,
            deadline,
            slots,
            failures,
            monitor: Some(monitor),
        });
        control.status = RunStatus::Running;
        Ok(())
    }

    /// Request an early stop. Idempotent: stopping an idle or already
    /// stopping coordinator is a no-op.
    pub fn stop(&self) -> Result<(), StateError> {
        let control = self.shared.control.lock().unwrap();
        if let Some(run) = &control.run {
            run.stop.trigger();
        }
        Ok(())
    }

    /// Snapshot of the current run for polling callers.
    pub fn query_status(&self) -> RunSnapshot {
        let control = self.shared.control.lock().unwrap();
        let Some(run) = &control.run else {
            return RunSnapshot {
                status: RunStatus::Idle,
                remaining_secs: 0,
                workers: Vec::new(),
                live_workers: 0,
                failures: Vec::new(),
            };
        };
        let workers: Vec<WorkerSnapshot> = {
            let slots = run.slots.lock().unwrap();
            slots
                .iter()
                .map(|s| WorkerSnapshot {
                    kind: s.kind,
                    id: s.id,
                    state: s.state,
                    reason: s.reason.clone(),
                    ops: s.ops.load(Ordering::Relaxed),
                })
                .collect()
        };
        let live_workers = workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .count();
        let failures = run.failures.lock().unwrap().clone();
        let remaining_secs = run
            .deadline
            .saturating_duration_since(Instant::now())
            .as_secs();
        RunSnapshot {
            status: control.status,
            remaining_secs,
            workers,
            live_workers,
            failures,
        }
    }

    /// Block until the current run (if any) has fully torn down, then return
    /// the final report. `None` when no run has completed yet.
    pub fn wait(&self) -> Option<RunReport> {
        let monitor = {
            let mut control = self.shared.control.lock().unwrap();
            control.run.as_mut().and_then(|r| r.monitor.take())
        };
        if let Some(handle) = monitor {
            if handle.join().is_err() {
                error!("monitor thread panicked");
            }
        }
        self.shared.control.lock().unwrap().last_report.clone()
    }

    /// Most recent completed-run report, if any.
    pub fn last_report(&self) -> Option<RunReport> {
        self.shared.control.lock().unwrap().last_report.clone()
    }
}

/// Spawns worker threads and records their slots.
struct Spawner {
    stop: StopSignal,
    events: Sender<FailureEvent>,
    slots: Arc<Mutex<Vec<Slot>>>,
    failures: Arc<Mutex<Vec<FailureEvent>>>,
    handles: Vec<Option<JoinHandle<()>>>,
}

impl Spawner {
    fn spawn(&mut self, kind: WorkerKind, id: u32, body: impl FnOnce(WorkerContext) + Send + 'static) {
        let ops = Arc::new(AtomicU64::new(0));
        let ctx = WorkerContext::new(kind, id, self.stop.clone(), self.events.clone(), Arc::clone(&ops));
        let spawned = std::thread::Builder::new()
            .name(format!("stressforge-{kind}-{id}"))
            .spawn(move || body(ctx));
        let mut slots = self.slots.lock().unwrap();
        match spawned {
            Ok(handle) => {
                slots.push(Slot {
                    kind,
                    id,
                    state: WorkerState::Running,
                    reason: None,
                    ops,
                });
                self.handles.push(Some(handle));
            }
            Err(e) => {
                error!(%kind, id, error = %e, "failed to spawn worker thread");
                slots.push(Slot {
                    kind,
                    id,
                    state: WorkerState::Failed,
                    reason: Some(format!("spawn failed: {e}")),
                    ops,
                });
                self.handles.push(None);
                self.failures.lock().unwrap().push(FailureEvent {
                    source_kind: kind,
                    source_id: id,
                    kind: FailureKind::IoFailure,
                    detail: format!("worker thread spawn failed: {e}"),
                    at: chrono::Utc::now(),
                });
            }
        }
    }
}

/// State owned by the monitor thread for the lifetime of one run.
struct MonitorTask {
    shared: Arc<Shared>,
    run_id: Uuid,
    started_at: chrono::DateTime<chrono::Utc>,
    started: Instant,
    deadline: Instant,
    grace: Duration,
    stop: StopSignal,
    events: Receiver<FailureEvent>,
    handles: Vec<Option<JoinHandle<()>>>,
    slots: Arc<Mutex<Vec<Slot>>>,
    failures: Arc<Mutex<Vec<FailureEvent>>>,
    disk_paths: Vec<PathBuf>,
    launched: LaunchCounts,
}

const MONITOR_TICK: Duration = Duration::from_millis(50);
const TEMP_SAMPLE_EVERY: Duration = Duration::from_secs(1);

impl MonitorTask {
    fn run(mut self) {
        let mut max_temp: Option<f64> = None;
        let mut last_temp: Option<Instant> = None;

        // Running phase: drain events, track liveness, watch the clock.
        loop {
            self.drain_events();
            self.refresh_liveness();
            if last_temp.map_or(true, |t| t.elapsed() >= TEMP_SAMPLE_EVERY) {
                last_temp = Some(Instant::now());
                if let Some(t) = self.sample_temperature() {
                    max_temp = Some(max_temp.map_or(t, |m: f64| m.max(t)));
                }
            }
            if self.stop.is_set() || Instant::now() >= self.deadline {
                break;
            }
            std::thread::sleep(MONITOR_TICK);
        }

        // Shutdown ordering guarantee: signal, then grace wait, then forced
        // abandonment, then temp-file cleanup, then Idle.
        self.stop.trigger();
        self.set_status(RunStatus::StoppingGrace);
        info!(run = %self.run_id, grace_secs = self.grace.as_secs(), "stop signalled; waiting for workers");

        let grace_deadline = Instant::now() + self.grace;
        while Instant::now() < grace_deadline && self.any_thread_alive() {
            self.drain_events();
            self.refresh_liveness();
            std::thread::sleep(Duration::from_millis(20));
        }
        self.reap_workers();
        // late events (e.g. the RAM integrity sweep) arrive during teardown
        self.drain_events();

        for path in &self.disk_paths {
            // workers remove their own files on a clean stop; this sweep
            // covers abandoned or crashed ones
            match std::fs::remove_file(path) {
                Ok(()) => warn!(path = %path.display(), "removed leftover backing file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "backing file cleanup failed"),
            }
        }

        let failures = self.failures.lock().unwrap().clone();
        let report = RunReport {
            run_id: self.run_id,
            started_at: self.started_at,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            workers_launched: self.launched,
            failures,
            max_cpu_temp_c: max_temp,
        };
        info!(
            run = %self.run_id,
            elapsed_secs = format!("{:.1}", report.elapsed_secs),
            failures = report.failures.len(),
            "run complete"
        );

        let mut control = self.shared.control.lock().unwrap();
        control.last_report = Some(report);
        control.status = RunStatus::Idle;
        control.run = None;
    }

    fn drain_events(&self) {
        while let Ok(event) = self.events.try_recv() {
            warn!(
                kind = ?event.kind,
                source = %event.source_kind,
                id = event.source_id,
                detail = %event.detail,
                "failure event"
            );
            self.record_failure(event);
        }
    }

    /// Append to the run's failure log and push to subscribers.
    fn record_failure(&self, event: FailureEvent) {
        self.failures.lock().unwrap().push(event.clone());
        self.notify_subscribers(&event);
    }

    /// Invoke subscriber callbacks without holding the subscriber lock, so a
    /// callback may itself call back into the coordinator (including
    /// `subscribe_failures`).
    fn notify_subscribers(&self, event: &FailureEvent) {
        let callbacks = std::mem::take(&mut *self.shared.subscribers.lock().unwrap());
        for callback in &callbacks {
            callback(event);
        }
        let mut subs = self.shared.subscribers.lock().unwrap();
        // anything registered during the callbacks lands after the existing set
        let registered_during = std::mem::replace(&mut *subs, callbacks);
        subs.extend(registered_during);
    }

    /// Join workers that have exited, so a mid-run panic surfaces as a crash
    /// event immediately rather than at teardown.
    fn refresh_liveness(&mut self) {
        let mut crashes = Vec::new();
        {
            let mut slots = self.slots.lock().unwrap();
            for (slot, handle) in slots.iter_mut().zip(self.handles.iter_mut()) {
                if slot.state != WorkerState::Running {
                    continue;
                }
                if !handle.as_ref().is_some_and(|h| h.is_finished()) {
                    continue;
                }
                if let Some(finished) = handle.take() {
                    match finished.join() {
                        Ok(()) => slot.state = WorkerState::Stopped,
                        Err(panic) => {
                            let detail = panic_message(&*panic);
                            error!(kind = %slot.kind, id = slot.id, %detail, "worker crashed");
                            slot.state = WorkerState::Failed;
                            slot.reason = Some(detail.clone());
                            crashes.push(FailureEvent {
                                source_kind: slot.kind,
                                source_id: slot.id,
                                kind: FailureKind::IoFailure,
                                detail: format!("worker crashed: {detail}"),
                                at: chrono::Utc::now(),
                            });
                        }
                    }
                }
            }
        }
        for event in crashes {
            self.record_failure(event);
        }
    }

    fn any_thread_alive(&self) -> bool {
        self.handles
            .iter()
            .flatten()
            .any(|h| !h.is_finished())
    }

    /// Join workers that exited during the grace wait, then abandon any worker
    /// still stuck past the grace window.
    fn reap_workers(&mut self) {
        self.refresh_liveness();
        let mut abandoned = Vec::new();
        {
            let mut slots = self.slots.lock().unwrap();
            for (slot, handle) in slots.iter_mut().zip(self.handles.iter_mut()) {
                let Some(handle) = handle.take() else {
                    continue; // never spawned, or already joined
                };
                // threads cannot be killed; record the abandonment and move on
                error!(kind = %slot.kind, id = slot.id, "worker ignored stop signal; abandoned");
                slot.state = WorkerState::Failed;
                slot.reason = Some("did not stop within grace period".into());
                abandoned.push(FailureEvent {
                    source_kind: slot.kind,
                    source_id: slot.id,
                    kind: FailureKind::IoFailure,
                    detail: "worker did not stop within grace period; abandoned".into(),
                    at: chrono::Utc::now(),
                });
                drop(handle);
            }
        }
        for event in abandoned {
            self.record_failure(event);
        }
    }

    fn sample_temperature(&self) -> Option<f64> {
        let provider = self.shared.temperature.lock().unwrap().clone()?;
        provider.read_cpu_temperature()
    }

    fn set_status(&self, status: RunStatus) {
        self.shared.control.lock().unwrap().status = status;
    }
}

/// Tally of workers that actually started. Slots whose thread spawn failed
/// are already `Failed` and do not count as launched.
fn launched_counts(slots: &[Slot]) -> LaunchCounts {
    LaunchCounts::tally(
        &slots
            .iter()
            .filter(|s| s.state != WorkerState::Failed)
            .map(|s| s.kind)
            .collect::<Vec<_>>(),
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
