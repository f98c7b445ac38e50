//! Evaluation results.
//!
//! `RuleResponse` is produced once per rule per mutation phase (overlay,
//! literal patches, autogen). `EngineResponse` aggregates them for one
//! (policy, resource) pair together with the resource as patched by every
//! rule in order.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::PatchOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    Mutation,
    Generation,
}

/// Outcome of one rule phase.
///
/// `success = true` with `patches = None` means the resource already
/// satisfies the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    pub name: String,
    pub rule_type: RuleType,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<Vec<PatchOperation>>,
    #[serde(default)]
    pub processing_time: Duration,
}

impl RuleResponse {
    pub fn failed(name: &str, rule_type: RuleType, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            rule_type,
            success: false,
            message: message.into(),
            patches: None,
            processing_time: Duration::ZERO,
        }
    }

    /// True when the phase succeeded and produced at least one operation.
    pub fn has_patches(&self) -> bool {
        self.success && self.patches.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Identity of the evaluated resource, captured before any rule ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentity {
    pub kind: String,
    pub api_version: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResponse {
    pub policy: String,
    pub resource: ResourceIdentity,
    pub rules: Vec<RuleResponse>,
    /// Number of phases that actually produced patches.
    pub rules_applied_count: u32,
    pub processing_time: Duration,
}

/// Result of evaluating one policy against one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub policy_response: PolicyResponse,
    /// The resource after every successful rule phase was applied in order.
    pub patched_resource: Value,
}

impl EngineResponse {
    /// True when no recorded rule phase failed.
    pub fn is_successful(&self) -> bool {
        self.policy_response.rules.iter().all(|r| r.success)
    }

    /// All patches from successful phases, in application order.
    pub fn patches(&self) -> Vec<PatchOperation> {
        self.policy_response
            .rules
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.patches.as_ref())
            .flatten()
            .cloned()
            .collect()
    }

    /// Names of rules whose phase failed.
    pub fn failed_rules(&self) -> Vec<&str> {
        self.policy_response
            .rules
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.name.as_str())
            .collect()
    }
}
