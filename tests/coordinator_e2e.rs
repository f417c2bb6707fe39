//! End-to-end runs through the coordinator control surface.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use stressforge::config::StressConfig;
use stressforge::{Coordinator, FailureKind, RunStatus, WorkerKind};

/// Short CPU-only config with a small kernel so debug-build steps stay fast.
fn cpu_config(duration_secs: u64, workers: usize) -> StressConfig {
    let mut cfg = StressConfig {
        duration_secs,
        grace_secs: 5,
        ..Default::default()
    };
    cfg.cpu.enabled = true;
    cfg.cpu.workers = workers;
    cfg.cpu.matrix_size = 16;
    cfg.cpu.affinity = None;
    cfg.ram.enabled = false;
    cfg.disk.enabled = false;
    cfg
}

#[test]
fn test_two_second_cpu_run_completes_clean() {
    let coordinator = Coordinator::new();
    coordinator.configure(cpu_config(2, 2)).unwrap();
    coordinator.start().unwrap();

    // Running must be observable promptly after start
    std::thread::sleep(Duration::from_millis(200));
    let snap = coordinator.query_status();
    assert_eq!(snap.status, RunStatus::Running);
    assert_eq!(snap.live_workers, 2);
    assert!(snap.workers.iter().all(|w| w.kind == WorkerKind::Cpu));

    let report = coordinator.wait().expect("report after deadline");
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures);
    assert_eq!(report.workers_launched.cpu, 2);
    assert_eq!(report.workers_launched.total(), 2);
    assert!(report.elapsed_secs >= 2.0);
    assert!(report.elapsed_secs < 10.0);
    assert_eq!(coordinator.query_status().status, RunStatus::Idle);
}

#[test]
fn test_stop_latency_within_grace_and_temp_files_removed() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = cpu_config(60, 1);
    cfg.disk.enabled = true;
    cfg.disk.workers = 2;
    cfg.disk.block_size_bytes = 4096;
    cfg.disk.file_size_bytes = 64 * 1024;
    cfg.disk.dir = dir.path().to_path_buf();

    let coordinator = Coordinator::new();
    coordinator.configure(cfg).unwrap();
    coordinator.start().unwrap();
    std::thread::sleep(Duration::from_millis(500));

    let stopped_at = Instant::now();
    coordinator.stop().unwrap();
    let report = coordinator.wait().expect("report after stop");
    // grace is 5s; allow scheduling overhead on top
    assert!(stopped_at.elapsed() < Duration::from_secs(7));
    assert_eq!(coordinator.query_status().status, RunStatus::Idle);
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures);
    assert_eq!(report.workers_launched.disk, 2);

    // every worker backing file must be gone after teardown
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
}

#[test]
fn test_ram_allocation_shortfall_is_reported_not_masked() {
    let mut cfg = cpu_config(30, 1);
    cfg.cpu.enabled = false;
    cfg.ram.enabled = true;
    // a block no allocator will grant; the worker must report 0 secured
    cfg.ram.block_size_bytes = usize::MAX / 2;
    cfg.ram.block_count = 4;

    let coordinator = Coordinator::new();
    let (tx, rx) = mpsc::channel();
    coordinator.subscribe_failures(move |event| {
        let _ = tx.send(event.clone());
    });
    coordinator.configure(cfg).unwrap();
    coordinator.start().unwrap();

    let event = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("allocation failure event");
    assert_eq!(event.kind, FailureKind::AllocationFailure);
    assert_eq!(event.source_kind, WorkerKind::Ram);
    assert!(event.detail.contains("0 of 4"), "detail: {}", event.detail);

    coordinator.stop().unwrap();
    let report = coordinator.wait().unwrap();
    assert!(report
        .failures
        .iter()
        .any(|f| f.kind == FailureKind::AllocationFailure));
}

#[test]
fn test_unresponsive_worker_abandoned_after_grace() {
    let mut cfg = cpu_config(1, 1);
    cfg.grace_secs = 1;
    cfg.cpu.enabled = false;
    cfg.ram.enabled = true;
    cfg.ram.block_size_bytes = 4096;
    cfg.ram.block_count = 2;
    cfg.ram.page_size_bytes = 1024;
    // a burst this long never reaches the stop check; the worker is stuck
    cfg.ram.stop_check_interval_ops = u64::MAX / 2;

    let coordinator = Coordinator::new();
    coordinator.configure(cfg).unwrap();
    let begun = Instant::now();
    coordinator.start().unwrap();
    let report = coordinator.wait().expect("report despite stuck worker");

    // 1s deadline + 1s grace; the stuck thread must not hold teardown hostage
    assert!(begun.elapsed() < Duration::from_secs(6));
    assert_eq!(coordinator.query_status().status, RunStatus::Idle);
    let abandoned: Vec<_> = report
        .failures
        .iter()
        .filter(|f| f.kind == FailureKind::IoFailure && f.detail.contains("grace"))
        .collect();
    assert_eq!(abandoned.len(), 1, "failures: {:?}", report.failures);
    assert_eq!(abandoned[0].source_kind, WorkerKind::Ram);
}

#[test]
fn test_subscriber_may_reenter_coordinator_from_callback() {
    let mut cfg = cpu_config(30, 1);
    cfg.cpu.enabled = false;
    cfg.ram.enabled = true;
    cfg.ram.block_size_bytes = usize::MAX / 2;
    cfg.ram.block_count = 1;

    let coordinator = Coordinator::new();
    let reentrant = coordinator.clone();
    let (tx, rx) = mpsc::channel();
    coordinator.subscribe_failures(move |event| {
        // registering another subscriber from inside a callback must not
        // deadlock the notification path
        let forward = tx.clone();
        reentrant.subscribe_failures(move |e| {
            let _ = forward.send(e.clone());
        });
        let _ = tx.send(event.clone());
    });
    coordinator.configure(cfg).unwrap();
    coordinator.start().unwrap();

    let event = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("callback completed without deadlock");
    assert_eq!(event.kind, FailureKind::AllocationFailure);

    coordinator.stop().unwrap();
    coordinator.wait().unwrap();
    assert_eq!(coordinator.query_status().status, RunStatus::Idle);
}

#[test]
fn test_disk_round_trip_under_concurrent_cpu_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = cpu_config(2, 1);
    cfg.disk.enabled = true;
    cfg.disk.workers = 1;
    cfg.disk.block_size_bytes = 4096;
    cfg.disk.file_size_bytes = 128 * 1024;
    cfg.disk.dir = dir.path().to_path_buf();

    let coordinator = Coordinator::new();
    coordinator.configure(cfg).unwrap();
    coordinator.start().unwrap();
    let report = coordinator.wait().unwrap();

    // healthy storage: every write read back identical, zero events
    assert!(report.is_clean(), "unexpected failures: {:?}", report.failures);
    assert_eq!(report.workers_launched.disk, 1);
}
