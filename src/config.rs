//! Master and chunk server configuration.
//!
//! Both structs deserialize from JSON with every field optional, so a config file
//! only needs to name the values it overrides. Durations are stored in
//! milliseconds and exposed as [`Duration`] through accessors.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
/// A node silent for this many heartbeat intervals is declared unhealthy.
pub const DEFAULT_UNHEALTHY_AFTER: u32 = 3;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TRANSFER_TIMEOUT_MS: u64 = 60_000;

/// Settings owned by the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub block_size: usize,
    pub replication_factor: usize,
    pub heartbeat_interval_ms: u64,
    pub unhealthy_after: u32,
    /// Timeout for block pushes and fetches issued by the master.
    pub transfer_timeout_ms: u64,
    pub repair_workers: usize,
    pub repair_queue_capacity: usize,
    /// Seconds between cluster status log lines; 0 disables the reporter.
    pub status_report_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            unhealthy_after: DEFAULT_UNHEALTHY_AFTER,
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
            repair_workers: 4,
            repair_queue_capacity: 1024,
            status_report_secs: 5,
        }
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("block_size must be non-zero");
        }
        if self.replication_factor == 0 {
            bail!("replication_factor must be at least 1");
        }
        if self.heartbeat_interval_ms == 0 {
            bail!("heartbeat_interval_ms must be non-zero");
        }
        if self.unhealthy_after == 0 {
            bail!("unhealthy_after must be at least 1");
        }
        if self.repair_workers == 0 || self.repair_queue_capacity == 0 {
            bail!("repair_workers and repair_queue_capacity must be non-zero");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which the health sweep flips a node to unhealthy.
    pub fn health_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.unhealthy_after
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Settings owned by a chunk server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// `host:port` of the master's HTTP endpoint.
    pub master_addr: String,
    /// `host:port` other members use to reach this chunk server.
    pub advertise_addr: String,
    pub data_dir: PathBuf,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub transfer_timeout_ms: u64,
    pub sync_workers: usize,
    pub sync_queue_capacity: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1:8000".to_string(),
            advertise_addr: "127.0.0.1:9000".to_string(),
            data_dir: PathBuf::from("data"),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT_MS,
            sync_workers: 2,
            sync_queue_capacity: 256,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.master_addr.is_empty() {
            bail!("master_addr must not be empty");
        }
        if self.advertise_addr.is_empty() {
            bail!("advertise_addr must not be empty");
        }
        if self.heartbeat_interval_ms == 0 {
            bail!("heartbeat_interval_ms must be non-zero");
        }
        if self.sync_workers == 0 || self.sync_queue_capacity == 0 {
            bail!("sync_workers and sync_queue_capacity must be non-zero");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ClusterConfig::default().validate().is_ok());
        assert!(ChunkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_health_timeout_is_three_intervals() {
        let config = ClusterConfig {
            heartbeat_interval_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.health_timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ClusterConfig =
            serde_json::from_str(r#"{"replication_factor": 2}"#).unwrap();
        assert_eq!(config.replication_factor, 2);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_zero_replication_rejected() {
        let config = ClusterConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.json");
        std::fs::write(&path, r#"{"block_size": 1024, "heartbeat_interval_ms": 250}"#).unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(250));
    }
}
