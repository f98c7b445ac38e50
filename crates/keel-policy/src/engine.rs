//! Policy set loading.
//!
//! `PolicySet` holds policies read from a TOML or JSON document and serves
//! them through `PolicyLister`.
//!
//! TOML layout:
//!
//! ```toml
//! [[policies]]
//! name = "add-defaults"
//! creationTimestamp = "2024-01-01T00:00:00Z"
//!
//! [[policies.rules]]
//! name = "default-team"
//! resourceDescription = { kinds = ["Pod"] }
//! mutation.overlay.metadata.labels = { "+(team)" = "platform" }
//! ```
//!
//! A JSON document may be either `{"policies": [...]}` or a single policy.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_contracts::{
    error::{KeelError, KeelResult},
    policy::Policy,
};
use keel_core::traits::PolicyLister;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicySet {
    pub fn new(policies: Vec<Policy>) -> Self {
        Self { policies }
    }

    /// Parse `s` as TOML.
    ///
    /// Returns `KeelError::Config` if the TOML is malformed or does not match
    /// the policy schema.
    pub fn from_toml_str(s: &str) -> KeelResult<Self> {
        let set: Self = toml::from_str(s).map_err(|e| KeelError::Config {
            reason: format!("failed to parse policy TOML: {e}"),
        })?;
        set.validated()
    }

    /// Parse `s` as JSON: a `{"policies": [...]}` set or one bare policy.
    pub fn from_json_str(s: &str) -> KeelResult<Self> {
        let value: serde_json::Value = serde_json::from_str(s).map_err(|e| KeelError::Config {
            reason: format!("failed to parse policy JSON: {e}"),
        })?;
        let set = if value.get("policies").is_some() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(|policy| Self::new(vec![policy]))
        }
        .map_err(|e| KeelError::Config {
            reason: format!("invalid policy JSON: {e}"),
        })?;
        set.validated()
    }

    /// Read the file at `path`. Files ending in `.json` are parsed as JSON,
    /// everything else as TOML.
    pub fn from_file(path: &Path) -> KeelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KeelError::Config {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        let set = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&contents)?
        } else {
            Self::from_toml_str(&contents)?
        };
        debug!(path = %path.display(), policies = set.policies.len(), "loaded policies");
        Ok(set)
    }

    pub fn find(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn validated(self) -> KeelResult<Self> {
        for policy in &self.policies {
            if policy.name.is_empty() {
                return Err(KeelError::Config {
                    reason: "policy name must not be empty".to_string(),
                });
            }
            for rule in &policy.rules {
                if rule.name.is_empty() {
                    return Err(KeelError::Config {
                        reason: format!("policy '{}' has a rule without a name", policy.name),
                    });
                }
            }
        }
        Ok(self)
    }
}

impl PolicyLister for PolicySet {
    fn get(&self, name: &str) -> KeelResult<Policy> {
        self.find(name)
            .cloned()
            .ok_or_else(|| KeelError::not_found("Policy", "", name))
    }
}
