use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use stressforge::config::{available_parallelism, StressConfig};
use stressforge::telemetry::{SysfsThermal, TemperatureProvider};
use stressforge::workers::kernel::KernelKind;
use stressforge::workers::InstabilityPolicy;
use stressforge::{Coordinator, RunStatus};

#[derive(Parser)]
#[command(
    name = "stressforge",
    about = "Configurable CPU/RAM/disk stress-test harness with instability detection",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stress test
    Run {
        /// Run duration in seconds (default: 60)
        #[arg(long)]
        duration: Option<u64>,

        /// Grace period for worker shutdown, in seconds (default: 5)
        #[arg(long)]
        grace: Option<u64>,

        /// Stress the CPU (default subsystem when none is selected)
        #[arg(long)]
        cpu: bool,

        /// Stress RAM
        #[arg(long)]
        ram: bool,

        /// Stress disk
        #[arg(long)]
        disk: bool,

        /// CPU worker count (default: one per logical core)
        #[arg(long)]
        cpu_workers: Option<usize>,

        /// Comma-separated logical cores to pin CPU workers to, round-robin
        #[arg(long, value_delimiter = ',')]
        affinity: Option<Vec<usize>>,

        /// Numeric kernel strategy for CPU workers (default: matrix)
        #[arg(long, value_enum)]
        kernel: Option<KernelKind>,

        /// What a CPU worker does after detected instability
        #[arg(long, value_enum)]
        on_instability: Option<InstabilityPolicy>,

        /// RAM block size in MiB (default: 64)
        #[arg(long)]
        ram_block_mb: Option<usize>,

        /// Number of RAM blocks to allocate (default: 8)
        #[arg(long)]
        ram_blocks: Option<usize>,

        /// Disk worker count (default: 1)
        #[arg(long)]
        disk_workers: Option<usize>,

        /// Disk backing-file size in MiB per worker (default: 256)
        #[arg(long)]
        disk_file_mb: Option<usize>,

        /// Directory for disk backing files (default: system temp dir)
        #[arg(long)]
        disk_dir: Option<PathBuf>,

        /// Load base configuration from a TOML file (flags override it)
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON report for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect the hardware this harness would stress
    Probe {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration,
            grace,
            cpu,
            ram,
            disk,
            cpu_workers,
            affinity,
            kernel,
            on_instability,
            ram_block_mb,
            ram_blocks,
            disk_workers,
            disk_file_mb,
            disk_dir,
            config,
            json,
        } => {
            let mut cfg = match config {
                Some(path) => StressConfig::from_toml_path(&path)?,
                None => StressConfig::default(),
            };
            if let Some(secs) = duration {
                cfg.duration_secs = secs;
            }
            if let Some(secs) = grace {
                cfg.grace_secs = secs;
            }
            // with no subsystem flag at all, default to CPU (the classic burn)
            if cpu || ram || disk {
                cfg.cpu.enabled = cpu;
                cfg.ram.enabled = ram;
                cfg.disk.enabled = disk;
            }
            if let Some(n) = cpu_workers {
                cfg.cpu.workers = n;
            }
            if affinity.is_some() {
                cfg.cpu.affinity = affinity;
            }
            if let Some(k) = kernel {
                cfg.cpu.kernel = k;
            }
            if let Some(policy) = on_instability {
                cfg.cpu.on_instability = policy;
            }
            if let Some(mb) = ram_block_mb {
                cfg.ram.block_size_bytes = mb * 1024 * 1024;
            }
            if let Some(n) = ram_blocks {
                cfg.ram.block_count = n;
            }
            if let Some(n) = disk_workers {
                cfg.disk.workers = n;
            }
            if let Some(mb) = disk_file_mb {
                cfg.disk.file_size_bytes = mb * 1024 * 1024;
            }
            if let Some(dir) = disk_dir {
                cfg.disk.dir = dir;
            }

            run_stress(cfg, json).await?;
        }
        Commands::Probe { json } => {
            let thermal = SysfsThermal::detect();
            let snapshot = HardwareProbe {
                logical_cores: available_parallelism(),
                temperature_available: thermal.is_some(),
                cpu_temp_c: thermal.as_ref().and_then(|t| t.read_cpu_temperature()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("\nstressforge hardware probe");
                println!("Logical cores:      {}", snapshot.logical_cores);
                match snapshot.cpu_temp_c {
                    Some(t) => println!("CPU temperature:    {t:.1} C"),
                    None => println!("CPU temperature:    unavailable"),
                }
            }
        }
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct HardwareProbe {
    logical_cores: usize,
    temperature_available: bool,
    cpu_temp_c: Option<f64>,
}

async fn run_stress(cfg: StressConfig, json: bool) -> Result<()> {
    let coordinator = Coordinator::new();
    if let Some(thermal) = SysfsThermal::detect() {
        coordinator.attach_temperature(Arc::new(thermal));
    }
    if !json {
        coordinator.subscribe_failures(|event| {
            eprintln!(
                "!! {}-{}: {:?}: {}",
                event.source_kind, event.source_id, event.kind, event.detail
            );
        });
    }

    coordinator.configure(cfg)?;
    coordinator.start()?;

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let snap = coordinator.query_status();
                if snap.status == RunStatus::Idle {
                    break;
                }
                if !json {
                    let r = snap.remaining_secs;
                    let ops: u64 = snap.workers.iter().map(|w| w.ops).sum();
                    println!(
                        "[{}] {:02}:{:02}:{:02} remaining | {} worker(s) live | {} ops | {} failure(s)",
                        snap.status,
                        r / 3600,
                        (r % 3600) / 60,
                        r % 60,
                        snap.live_workers,
                        ops,
                        snap.failures.len()
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; stopping run");
                coordinator.stop()?;
            }
        }
    }

    let waiter = coordinator.clone();
    let report = tokio::task::spawn_blocking(move || waiter.wait())
        .await?
        .ok_or_else(|| anyhow::anyhow!("run ended without a report"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
