use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, Context as AnyhowContext};
use serde::{Serialize, Deserialize};
use crate::runtime::task::DEFAULT_NOTIFY_GRANULARITY;

/// Runtime settings, usually read from a YAML file:
///
/// ```yaml
/// grace_period_ms: 5000
/// notify_granularity: 0.01
/// workflows_dir: /etc/mediaflow/workflows
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// How long settled tasks stay queryable.
    pub grace_period_ms: u64,
    pub notify_granularity: f64,
    pub workflows_dir: Option<PathBuf>,
    /// Capacity of the command queue feeding the control loop.
    pub command_buffer: usize,
    pub purge_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5000,
            notify_granularity: DEFAULT_NOTIFY_GRANULARITY,
            workflows_dir: None,
            command_buffer: 100,
            purge_interval_ms: 1000,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)
            .context("Failed to deserialize engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.notify_granularity > 0.0 && self.notify_granularity <= 1.0) {
            anyhow::bail!("notify_granularity must be within (0, 1], got {}", self.notify_granularity);
        }
        if self.command_buffer == 0 {
            anyhow::bail!("command_buffer must be at least 1");
        }
        if self.purge_interval_ms == 0 {
            anyhow::bail!("purge_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_interval_ms)
    }
}
