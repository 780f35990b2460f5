//! Driver configuration.
//!
//! Every timing budget the driver uses lives here so a front end can tune
//! them from a TOML file. Defaults match the device documentation.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::usage::UsagePolicy;

/// Configuration for an `Axiom` session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxiomConfig {
    /// Polls of u02 after a usage write.
    pub write_monitor_retries: u32,
    pub write_monitor_interval_ms: u64,
    /// Dwell between issuing a u02 command and polling it.
    pub command_dwell_ms: u64,
    /// Polls of u02 after a command.
    pub command_retries: u32,
    pub command_interval_ms: u64,
    /// Polls per CDU command.
    pub cdu_poll_retries: u32,
    pub cdu_poll_interval_ms: u64,
    /// Dwell after COMMIT while the device writes flash.
    pub cdu_commit_dwell_ms: u64,
    /// Polls of the bootloader status register.
    pub busy_retries: u32,
    pub busy_interval_ms: u64,
    /// Enter-bootloader sequences before giving up.
    pub bootloader_entry_attempts: u32,
    /// Dwell after each of the first two magic writes.
    pub bootloader_magic_dwell_ms: u64,
    /// Dwell after the last magic write.
    pub bootloader_entry_dwell_ms: u64,
    /// Usage classification for configuration writes.
    pub policy: UsagePolicy,
}

impl Default for AxiomConfig {
    fn default() -> Self {
        Self {
            write_monitor_retries: 1000,
            write_monitor_interval_ms: 1,
            command_dwell_ms: 100,
            command_retries: 100,
            command_interval_ms: 10,
            cdu_poll_retries: 5000,
            cdu_poll_interval_ms: 1,
            cdu_commit_dwell_ms: 500,
            busy_retries: 5000,
            busy_interval_ms: 1,
            bootloader_entry_attempts: 5,
            bootloader_magic_dwell_ms: 1,
            bootloader_entry_dwell_ms: 200,
            policy: UsagePolicy::default(),
        }
    }
}

impl AxiomConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AxiomConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Sleep unless the duration is zero.
pub(crate) fn dwell(ms: u64) {
    if ms > 0 {
        std::thread::sleep(millis(ms));
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AxiomConfig {
    AxiomConfig {
        write_monitor_interval_ms: 0,
        command_dwell_ms: 0,
        command_interval_ms: 0,
        cdu_poll_interval_ms: 0,
        cdu_commit_dwell_ms: 0,
        busy_interval_ms: 0,
        bootloader_magic_dwell_ms: 0,
        bootloader_entry_dwell_ms: 0,
        ..Default::default()
    }
}
