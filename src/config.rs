use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::ConfigError;

/// What the driver does when a work unit reports a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Resubmit until the attempt budget in [`DriverConfig::retries`] is spent.
    #[default]
    Retry,
    /// Give up on the first failure.
    Abort,
}

/// Resource hints attached to every work unit. Runtimes are free to ignore
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Resources {
    pub cores: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Total number of attempts per work unit, the first one included.
    pub retries: u32,
    pub on_failure: FailurePolicy,
    /// How long a single wait for a completion may block.
    pub wait_timeout_ms: u64,
    /// Consecutive empty waits after which the driver gives up. Unbounded
    /// when unset.
    pub max_idle_waits: Option<u32>,
    pub low_memory_mode: bool,
    pub check_cycles: bool,
    pub resources: Option<Resources>,
    pub env_vars: BTreeMap<String, String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            on_failure: FailurePolicy::Retry,
            wait_timeout_ms: 5000,
            max_idle_waits: None,
            low_memory_mode: false,
            check_cycles: true,
            resources: None,
            env_vars: BTreeMap::new(),
        }
    }
}

impl DriverConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        tracing::debug!(%path, "loading driver configuration");
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retries < 1 {
            return Err(ConfigError::Invalid(format!(
                "retries must be at least 1, got {}",
                self.retries
            )));
        }

        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Invalid("wait_timeout_ms must be positive".into()));
        }

        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Attempts allowed for one work unit under the configured policy.
    pub fn max_attempts(&self) -> u32 {
        match self.on_failure {
            FailurePolicy::Retry => self.retries,
            FailurePolicy::Abort => 1,
        }
    }
}
