use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::job::DEFAULT_RETRY_LIMIT;

/// Tunables for a [`JobManager`](crate::JobManager), readable from YAML.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ManagerConfig {
    /// Number of consumer workers.
    pub consumers: usize,
    /// Delay between a job being added and consumers being woken for it.
    /// Zero wakes them immediately.
    pub flush_interval_ms: u64,
    /// Re-arms the flush timer after every expiry, giving a periodic re-check.
    pub flush_loop: bool,
    /// How long an idle consumer waits before re-checking the queues anyway.
    pub idle_recheck_ms: u64,
    /// Run limit for failing jobs that don't set their own.
    pub default_retry_limit: u32,
    /// Creates the manager with consumers stopped.
    pub start_stopped: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            consumers: 2,
            flush_interval_ms: 0,
            flush_loop: false,
            idle_recheck_ms: 1000,
            default_retry_limit: DEFAULT_RETRY_LIMIT,
            start_stopped: false,
        }
    }
}

impl ManagerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.consumers == 0 {
            return Err(Error::Config("consumers must be at least 1".into()));
        }
        if self.idle_recheck_ms == 0 {
            return Err(Error::Config(
                "idle-recheck-ms must be at least 1".into(),
            ));
        }
        if self.default_retry_limit == 0 {
            return Err(Error::Config(
                "default-retry-limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn idle_recheck(&self) -> Duration {
        Duration::from_millis(self.idle_recheck_ms)
    }
}
