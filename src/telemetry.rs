//! Optional CPU temperature readings from an external monitoring collaborator.
//!
//! The harness never blocks on temperature: a provider either answers
//! immediately or returns `None`, and a missing provider is treated as
//! permanently unavailable.

use std::path::PathBuf;

/// Narrow seam to whatever hardware monitoring the host offers.
pub trait TemperatureProvider: Send + Sync {
    /// Current CPU temperature in degrees Celsius, if readable right now.
    fn read_cpu_temperature(&self) -> Option<f64>;
}

/// Reads the kernel thermal zone sysfs file (millidegrees Celsius).
pub struct SysfsThermal {
    zone: PathBuf,
}

impl SysfsThermal {
    const DEFAULT_ZONE: &'static str = "/sys/class/thermal/thermal_zone0/temp";

    /// Probe the default thermal zone; `None` when the host exposes none.
    pub fn detect() -> Option<Self> {
        let zone = PathBuf::from(Self::DEFAULT_ZONE);
        zone.exists().then_some(Self { zone })
    }

    pub fn at(zone: PathBuf) -> Self {
        Self { zone }
    }
}

impl TemperatureProvider for SysfsThermal {
    fn read_cpu_temperature(&self) -> Option<f64> {
        let raw = std::fs::read_to_string(&self.zone).ok()?;
        let milli: f64 = raw.trim().parse().ok()?;
        Some(milli / 1000.0)
    }
}

/// Provider for hosts with no readable sensor; always unavailable.
pub struct NullTemperature;

impl TemperatureProvider for NullTemperature {
    fn read_cpu_temperature(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sysfs_parses_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("temp");
        let mut f = std::fs::File::create(&zone).unwrap();
        writeln!(f, "48750").unwrap();

        let provider = SysfsThermal::at(zone);
        assert_eq!(provider.read_cpu_temperature(), Some(48.75));
    }

    #[test]
    fn test_sysfs_missing_file_is_none() {
        let provider = SysfsThermal::at(PathBuf::from("/nonexistent/thermal"));
        assert_eq!(provider.read_cpu_temperature(), None);
    }

    #[test]
    fn test_null_provider_always_none() {
        assert_eq!(NullTemperature.read_cpu_temperature(), None);
    }
}
