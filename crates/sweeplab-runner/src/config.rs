//! Executor tuning configuration
//!
//! Loaded from a TOML file or built in code. Every field has a default,
//! so a config file only needs the settings it changes:
//!
//! ```toml
//! workers = 4
//! waiting_time_secs = 10
//! retries = 3
//! reconnections = 5
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use sweeplab_core::error::{Error, Result};

/// Tuning for the parallel and remote executors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Worker count: a positive value is capped at the physical cores,
    /// zero uses all physical cores, and a negative value leaves that
    /// many cores free (minimum one worker).
    pub workers: i32,

    /// Sleep between polls while waiting for pending results.
    pub waiting_time_secs: u64,

    /// How many times a crashed job is re-run before it is marked
    /// failed.
    pub retries: u32,

    /// How many times to retry connecting to a worker pool.
    pub reconnections: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            waiting_time_secs: 30,
            retries: 3,
            reconnections: 5,
        }
    }
}

impl ExecutorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| Error::Format(e.to_string()))
    }

    pub fn waiting_time(&self) -> Duration {
        Duration::from_secs(self.waiting_time_secs)
    }

    /// Resolve the configured worker count against the machine's
    /// physical cores.
    pub fn worker_count(&self) -> usize {
        let physical = num_cpus::get_physical();
        if self.workers == 0 {
            physical
        } else if self.workers > 0 {
            (self.workers as usize).min(physical)
        } else {
            (physical as i64 + self.workers as i64).max(1) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.waiting_time(), Duration::from_secs(30));
        assert_eq!(config.retries, 3);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_partial_toml() {
        let config: ExecutorConfig = toml::from_str("workers = 2\nretries = 1\n").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.retries, 1);
        assert_eq!(config.waiting_time_secs, 30);

        assert!(toml::from_str::<ExecutorConfig>("cores = 2").is_err());
    }

    #[test]
    fn test_worker_count_resolution() {
        let physical = num_cpus::get_physical();

        let all = ExecutorConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(all.worker_count(), physical);

        let capped = ExecutorConfig {
            workers: i32::MAX,
            ..Default::default()
        };
        assert_eq!(capped.worker_count(), physical);

        let spare = ExecutorConfig {
            workers: -(physical as i32) - 5,
            ..Default::default()
        };
        assert_eq!(spare.worker_count(), 1);
    }
}
