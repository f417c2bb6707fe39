//! Run configuration: per-subsystem knobs, defaults, TOML loading, and the
//! validation gate every run passes before anything is spawned.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workers::kernel::KernelKind;
use crate::workers::InstabilityPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("run duration must be greater than zero")]
    ZeroDuration,

    #[error("{subsystem} worker count must be at least 1")]
    ZeroWorkers { subsystem: &'static str },

    #[error("cpu affinity core {core} out of range (0..{available} available)")]
    AffinityOutOfRange { core: usize, available: usize },

    #[error("ram block size {block} too small: need at least two pages of {page} bytes")]
    RamBlockTooSmall { block: usize, page: usize },

    #[error("ram page size {page} too small (minimum 1024)")]
    PageTooSmall { page: usize },

    #[error("disk file size {file} must strictly exceed block size {block}")]
    DiskFileTooSmall { file: usize, block: usize },

    #[error("disk block size must be nonzero")]
    ZeroBlockSize,

    #[error("ram block count must be at least 1")]
    ZeroRamBlocks,
}

/// Full configuration for one stress run. Immutable once a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    /// Wall-clock run length in seconds.
    pub duration_secs: u64,
    /// How long the coordinator waits for workers to observe the stop signal
    /// before abandoning them.
    pub grace_secs: u64,
    pub cpu: CpuConfig,
    pub ram: RamConfig,
    pub disk: DiskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub enabled: bool,
    /// One kernel-burning thread per unit of parallelism.
    pub workers: usize,
    /// Explicit logical-core assignments, applied round-robin across workers.
    pub affinity: Option<Vec<usize>>,
    pub kernel: KernelKind,
    /// Matrix dimension for the matrix kernel.
    pub matrix_size: usize,
    pub on_instability: InstabilityPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RamConfig {
    pub enabled: bool,
    pub block_size_bytes: usize,
    pub block_count: usize,
    /// Alignment for randomized accesses; should match the platform page size.
    pub page_size_bytes: usize,
    /// Accesses performed between stop-signal checks. Lower improves stop
    /// latency, higher keeps the loop hotter.
    pub stop_check_interval_ops: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub enabled: bool,
    pub workers: usize,
    pub block_size_bytes: usize,
    pub file_size_bytes: usize,
    /// Directory for backing files; each worker gets a distinct path inside.
    pub dir: PathBuf,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            grace_secs: 5,
            cpu: CpuConfig::default(),
            ram: RamConfig::default(),
            disk: DiskConfig::default(),
        }
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: available_parallelism(),
            affinity: None,
            kernel: KernelKind::default(),
            matrix_size: 128,
            on_instability: InstabilityPolicy::default(),
        }
    }
}

impl Default for RamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            block_size_bytes: 64 * 1024 * 1024,
            block_count: 8,
            page_size_bytes: 4096,
            stop_check_interval_ops: 4096,
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: 1,
            block_size_bytes: 4096,
            file_size_bytes: 256 * 1024 * 1024,
            dir: std::env::temp_dir(),
        }
    }
}

/// Logical cores visible to this process.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl StressConfig {
    /// Load from a TOML file; absent keys fall back to defaults.
    pub fn from_toml_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: StressConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// Reject anything a run must not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_secs == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        if self.cpu.enabled {
            if self.cpu.workers == 0 {
                return Err(ConfigError::ZeroWorkers { subsystem: "cpu" });
            }
            if let Some(cores) = &self.cpu.affinity {
                let available = available_parallelism();
                if let Some(&core) = cores.iter().find(|&&c| c >= available) {
                    return Err(ConfigError::AffinityOutOfRange { core, available });
                }
            }
        }
        if self.ram.enabled {
            if self.ram.block_count == 0 {
                return Err(ConfigError::ZeroRamBlocks);
            }
            if self.ram.page_size_bytes < 1024 {
                return Err(ConfigError::PageTooSmall {
                    page: self.ram.page_size_bytes,
                });
            }
            if self.ram.block_size_bytes < 2 * self.ram.page_size_bytes {
                return Err(ConfigError::RamBlockTooSmall {
                    block: self.ram.block_size_bytes,
                    page: self.ram.page_size_bytes,
                });
            }
        }
        if self.disk.enabled {
            if self.disk.workers == 0 {
                return Err(ConfigError::ZeroWorkers { subsystem: "disk" });
            }
            if self.disk.block_size_bytes == 0 {
                return Err(ConfigError::ZeroBlockSize);
            }
            if self.disk.file_size_bytes <= self.disk.block_size_bytes {
                return Err(ConfigError::DiskFileTooSmall {
                    file: self.disk.file_size_bytes,
                    block: self.disk.block_size_bytes,
                });
            }
        }
        Ok(())
    }
}

impl CpuConfig {
    /// Core assignment for a worker: round-robin over the explicit affinity
    /// list, or none when unpinned.
    pub fn core_for(&self, worker_id: u32) -> Option<usize> {
        self.affinity
            .as_ref()
            .filter(|cores| !cores.is_empty())
            .map(|cores| cores[worker_id as usize % cores.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        StressConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_duration_rejected() {
        let cfg = StressConfig {
            duration_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroDuration)));
    }

    #[test]
    fn test_disk_file_must_exceed_block() {
        let mut cfg = StressConfig::default();
        cfg.disk.enabled = true;
        cfg.disk.block_size_bytes = 4096;
        cfg.disk.file_size_bytes = 4096;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DiskFileTooSmall { .. })
        ));
    }

    #[test]
    fn test_affinity_bounded_by_available_cores() {
        let mut cfg = StressConfig::default();
        cfg.cpu.affinity = Some(vec![0, 4096]);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::AffinityOutOfRange { core: 4096, .. })
        ));
    }

    #[test]
    fn test_core_for_round_robin() {
        let cpu = CpuConfig {
            affinity: Some(vec![2, 3]),
            ..Default::default()
        };
        assert_eq!(cpu.core_for(0), Some(2));
        assert_eq!(cpu.core_for(1), Some(3));
        assert_eq!(cpu.core_for(2), Some(2));
        let unpinned = CpuConfig::default();
        assert_eq!(unpinned.core_for(0), None);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: StressConfig = toml::from_str(
            r#"
            duration_secs = 120
            [ram]
            enabled = true
            block_count = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.duration_secs, 120);
        assert!(cfg.ram.enabled);
        assert_eq!(cfg.ram.block_count, 2);
        assert_eq!(cfg.grace_secs, 5);
        assert!(cfg.cpu.enabled);
    }
}
