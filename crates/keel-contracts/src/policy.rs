//! Policy, rule, and caller-identity types.
//!
//! A `Policy` is an ordered list of `Rule`s. During evaluation policies are
//! read-only: anything that gets variable-substituted (conditions, overlays,
//! generation attributes) is cloned out of the rule first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{KeelError, KeelResult},
    patch::PatchOperation,
};

/// A named, ordered sequence of rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: String,

    /// When the policy object was created. Generation never acts on
    /// resources created before this instant.
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A single policy rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    /// Selection criteria a resource must satisfy for the rule to apply.
    #[serde(default)]
    pub resource_description: ResourceDescription,

    /// Resources matching this description are skipped even if they match
    /// `resource_description`.
    #[serde(default)]
    pub exclude: Option<ResourceDescription>,

    /// Preconditions, AND-combined.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub mutation: Mutation,

    #[serde(default)]
    pub generation: Option<Generation>,
}

impl Policy {
    /// Parse a single policy from JSON.
    pub fn from_json_str(s: &str) -> KeelResult<Self> {
        serde_json::from_str(s).map_err(|e| KeelError::Config {
            reason: format!("invalid policy JSON: {e}"),
        })
    }

    /// Rules with a mutation block.
    pub fn mutate_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.has_mutate())
    }

    pub fn has_generate(&self) -> bool {
        self.rules.iter().any(Rule::has_generate)
    }
}

impl Rule {
    pub fn has_mutate(&self) -> bool {
        self.mutation.overlay.is_some() || !self.mutation.patches.is_empty()
    }

    pub fn has_generate(&self) -> bool {
        self.generation.is_some()
    }
}

/// Which resources a rule selects.
///
/// Every populated field must hold for a resource to match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    /// The resource kind must equal one of these.
    #[serde(default)]
    pub kinds: Vec<String>,

    /// Name pattern; `*` and `?` wildcards are honoured.
    #[serde(default)]
    pub name: Option<String>,

    /// Namespace patterns. Empty means any namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub selector: Option<LabelSelector>,

    /// Constraints on the caller that triggered the evaluation.
    #[serde(default)]
    pub user_info: Option<UserInfoFilter>,
}

/// Kubernetes-style label selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Return true if `labels` satisfies every label and expression.
    ///
    /// An empty selector matches everything.
    pub fn matches(&self, labels: &std::collections::BTreeMap<String, String>) -> bool {
        let labels_match = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));

        labels_match
            && self.match_expressions.iter().all(|req| {
                let actual = labels.get(&req.key);
                match req.operator {
                    SelectorOperator::In => actual.is_some_and(|v| req.values.contains(v)),
                    SelectorOperator::NotIn => actual.map_or(true, |v| !req.values.contains(v)),
                    SelectorOperator::Exists => actual.is_some(),
                    SelectorOperator::DoesNotExist => actual.is_none(),
                }
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Caller-identity constraints. Each non-empty list must be satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoFilter {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

/// An RBAC-style subject: `User`, `Group`, or `ServiceAccount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// The authenticated caller of an admission request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Caller identity attached to an admission request.
///
/// The default (all-empty) value marks a synthetic evaluation, such as a
/// background pass over pre-existing resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub cluster_roles: Vec<String>,
    #[serde(default)]
    pub user_info: UserInfo,
}

impl RequestInfo {
    /// True when no caller identity is attached at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single precondition: `key <operator> value`, both sides substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub key: Value,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(alias = "Equals")]
    Equal,
    #[serde(alias = "NotEquals")]
    NotEqual,
    In,
    NotIn,
}

/// Mutation capability of a rule: an overlay, literal patches, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    #[serde(default)]
    pub overlay: Option<Value>,
    #[serde(default)]
    pub patches: Vec<PatchOperation>,
}

/// Generation capability of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Inline template used as the creation payload.
    #[serde(default)]
    pub data: Option<Value>,
    /// Existing object whose content is copied verbatim.
    #[serde(default)]
    pub clone: Option<CloneFrom>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneFrom {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
}
