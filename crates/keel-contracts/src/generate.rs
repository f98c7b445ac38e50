//! GenerateRequest: the durable unit of generate work.
//!
//! A request records "create resources from resource A under policy P" and
//! the outcome of the last pass. State only ever moves from `New` to a
//! terminal state; a request that is delivered again while terminal is a
//! replay, not a fresh attempt.

use serde::{Deserialize, Serialize};

use crate::{policy::RequestInfo, resource::ResourceSpec};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerateRequestState {
    /// Never processed. Serialized as the empty string.
    #[default]
    #[serde(rename = "")]
    New,
    Completed,
    Failed,
}

impl GenerateRequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::New)
    }
}

impl std::fmt::Display for GenerateRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => f.write_str("New"),
            Self::Completed => f.write_str("Completed"),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequestContext {
    #[serde(default)]
    pub user_request_info: RequestInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequestSpec {
    /// Name of the policy whose generate rules apply.
    pub policy: String,
    /// The triggering resource.
    pub resource: ResourceSpec,
    #[serde(default)]
    pub context: GenerateRequestContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequestStatus {
    #[serde(default)]
    pub state: GenerateRequestState,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub generated_resources: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub name: String,
    pub spec: GenerateRequestSpec,
    #[serde(default)]
    pub status: GenerateRequestStatus,
}

impl GenerateRequest {
    /// A fresh request with a unique `gr-` name.
    pub fn new(policy: impl Into<String>, resource: ResourceSpec, user_request_info: RequestInfo) -> Self {
        Self {
            name: format!("gr-{}", uuid::Uuid::new_v4().simple()),
            spec: GenerateRequestSpec {
                policy: policy.into(),
                resource,
                context: GenerateRequestContext { user_request_info },
            },
            status: GenerateRequestStatus::default(),
        }
    }
}
