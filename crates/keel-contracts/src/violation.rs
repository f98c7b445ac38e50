//! Violation and event records handed to fire-and-forget recorders.

use serde::{Deserialize, Serialize};

use crate::{resource::ResourceSpec, response::RuleType};

/// A rule that a resource violated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolatedRule {
    pub name: String,
    pub rule_type: RuleType,
    pub message: String,
}

/// A semantic policy failure to be durably recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationInfo {
    pub policy_name: String,
    pub resource: ResourceSpec,
    pub rules: Vec<ViolatedRule>,
    /// Whether the triggering request was rejected. Generation and background
    /// scans never block.
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventReason {
    PolicyApplied,
    PolicyFailed,
    PolicyViolation,
}

impl std::fmt::Display for EventReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PolicyApplied => f.write_str("PolicyApplied"),
            Self::PolicyFailed => f.write_str("PolicyFailed"),
            Self::PolicyViolation => f.write_str("PolicyViolation"),
        }
    }
}

/// A human-facing event attached to a resource or policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The object the event is about.
    pub target: ResourceSpec,
    pub reason: EventReason,
    pub message: String,
}
