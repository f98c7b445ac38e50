//! Controller configuration.
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.
//!
//! ```toml
//! workers = 4
//! retry_limit = 5
//! base_delay_ms = 5
//! max_delay_ms = 60000
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use keel_contracts::error::{KeelError, KeelResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of worker threads pulling from the queue.
    pub workers: usize,
    /// How many times a failing key is re-queued before it is dropped.
    pub retry_limit: u32,
    /// First retry delay; doubles on every consecutive failure.
    pub base_delay_ms: u64,
    /// Upper bound on the retry delay.
    pub max_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            retry_limit: 5,
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
        }
    }
}

impl ControllerConfig {
    /// Parse `s` as TOML.
    ///
    /// Returns `KeelError::Config` if the document is malformed or asks for
    /// zero workers.
    pub fn from_toml_str(s: &str) -> KeelResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| KeelError::Config {
            reason: format!("failed to parse controller TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as TOML.
    pub fn from_file(path: &Path) -> KeelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KeelError::Config {
            reason: format!("failed to read controller config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> KeelResult<()> {
        if self.workers == 0 {
            return Err(KeelError::Config {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(KeelError::Config {
                reason: format!(
                    "base_delay_ms ({}) exceeds max_delay_ms ({})",
                    self.base_delay_ms, self.max_delay_ms
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ControllerConfig;
    use keel_contracts::error::KeelError;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = ControllerConfig::from_toml_str("workers = 8\nretry_limit = 3").unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.base_delay_ms, 5);
    }

    #[test]
    fn zero_workers_is_rejected() {
        match ControllerConfig::from_toml_str("workers = 0") {
            Err(KeelError::Config { reason }) => assert!(reason.contains("workers")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_toml_is_config_error() {
        match ControllerConfig::from_toml_str("workers = [") {
            Err(KeelError::Config { reason }) => {
                assert!(reason.contains("failed to parse controller TOML"))
            }
            other => panic!("expected Config error, got {:?}", other),
        }
    }
}
