//! Daemon configuration

use anyhow::Context;
use jsbox_core::{RunnerConfig, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to Unix socket
    pub socket_path: PathBuf,

    /// How instances are booted
    pub runtime: RuntimeConfig,

    /// How scripts are run inside them
    pub runner: RunnerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: jsbox_core::config::default_socket_path(),
            runtime: RuntimeConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// The interpreter probed at boot must be the one runs are spawned with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            Path::new(&self.runner.interpreter) == self.runtime.interpreter,
            "runtime.interpreter ({}) and runner.interpreter ({}) differ",
            self.runtime.interpreter.display(),
            self.runner.interpreter
        );
        Ok(())
    }
}
