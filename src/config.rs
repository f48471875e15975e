//! Configuration for pinflow
//!
//! All tunables for discovery, probing, flashing and the runner live here,
//! grouped into sub-structs with sensible defaults. A config can be loaded
//! from and saved to a TOML file; every field falls back to its default when
//! absent so older config files keep working.

use crate::error::{PinflowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default fixed resource path for firmware images (`hex/<board>/<file>`)
pub const DEFAULT_FIRMWARE_DIR: &str = "hex";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub probe: ProbeConfig,
    pub flash: FlashConfig,
    pub runner: RunnerConfig,
    pub channels: ChannelConfig,
}

/// Port scanning and rediscovery behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval of the health monitor's port-list poll, in milliseconds
    pub poll_interval_ms: u64,
    /// Fixed back-off between consecutive rediscovery attempts, in milliseconds
    pub backoff_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            backoff_ms: 2_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Board probing behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Bounded window for a probe to reach a terminal state, in milliseconds
    pub window_ms: u64,
    /// Interval between firmware-report queries during the handshake
    pub handshake_retry_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            handshake_retry_ms: 250,
        }
    }
}

impl ProbeConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }
}

/// Firmware flashing behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlashConfig {
    /// Directory holding firmware images, keyed by board name
    pub firmware_dir: PathBuf,
    /// Bounded number of retries for protocol failures while the port exists
    pub max_retries: u32,
    /// Attempts to synchronize with the bootloader after the reset pulse
    pub sync_attempts: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from(DEFAULT_FIRMWARE_DIR),
            max_retries: 3,
            sync_attempts: 8,
        }
    }
}

/// Runner process supervision behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Grace period after a kill before the serial port is considered free
    pub grace_period_ms: u64,
    /// Bounded wait for the runner's program-level ready message
    pub ready_timeout_ms: u64,
    /// Cadence of runner statistics reports
    pub stats_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 500,
            ready_timeout_ms: 8_000,
            stats_interval_ms: 500,
        }
    }
}

impl RunnerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

/// Channel capacities for the command/event plumbing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Editor-to-orchestrator command channel capacity
    pub command_capacity: usize,
    /// Orchestrator-to-editor event channel capacity.
    /// Bounded for backpressure; node-value floods drop rather than balloon.
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            event_capacity: 10_000,
        }
    }
}

impl AppConfig {
    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| PinflowError::Config(e.to_string()))
    }

    /// Save the config to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text =
            toml::to_string_pretty(self).map_err(|e| PinflowError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    /// Load from a file if given, warning and falling back to defaults on error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => match Self::load(p) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", p.display(), e);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.discovery.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.flash.max_retries, 3);
        assert_eq!(cfg.flash.firmware_dir, PathBuf::from("hex"));
        assert!(cfg.runner.grace_period() > Duration::ZERO);
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pinflow.toml");

        let mut cfg = AppConfig::default();
        cfg.discovery.backoff_ms = 1_234;
        cfg.flash.max_retries = 7;
        cfg.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[discovery]\npoll_interval_ms = 100\n").unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.discovery.poll_interval_ms, 100);
        assert_eq!(cfg.probe, ProbeConfig::default());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let cfg = AppConfig::load_or_default(Some(Path::new("/nonexistent/pinflow.toml")));
        assert_eq!(cfg, AppConfig::default());
    }
}
