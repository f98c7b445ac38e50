//! Resource selection: does a resource fall under a rule?
//!
//! A mismatch is a normal outcome, reported with every reason found so it
//! can be logged, and never an error.

use serde_json::Value;

use keel_contracts::{
    policy::{RequestInfo, ResourceDescription, Rule, Subject, UserInfoFilter},
    resource::ResourceExt,
};

use crate::wildcard::wildcard_match;

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Why a resource was not selected by a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub reasons: Vec<String>,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reasons.join("; "))
    }
}

/// Check `resource` against the rule's match block, then its exclude block.
pub fn matches_resource_description(resource: &Value, rule: &Rule, info: &RequestInfo) -> Result<(), Mismatch> {
    let reasons = description_mismatches(resource, &rule.resource_description, info);
    if !reasons.is_empty() {
        return Err(Mismatch { reasons });
    }

    if let Some(exclude) = &rule.exclude {
        if description_mismatches(resource, exclude, info).is_empty() {
            return Err(Mismatch {
                reasons: vec![format!("resource is excluded by rule '{}'", rule.name)],
            });
        }
    }
    Ok(())
}

/// Shorthand for callers that only need the verdict.
pub fn rule_applies(resource: &Value, rule: &Rule, info: &RequestInfo) -> bool {
    matches_resource_description(resource, rule, info).is_ok()
}

fn description_mismatches(resource: &Value, description: &ResourceDescription, info: &RequestInfo) -> Vec<String> {
    let mut reasons = Vec::new();

    let kind = resource.kind();
    if !description.kinds.iter().any(|k| k == kind) {
        reasons.push(format!("kind '{kind}' not in {:?}", description.kinds));
    }

    if let Some(pattern) = description.name.as_deref().filter(|p| !p.is_empty()) {
        if !wildcard_match(pattern, resource.name()) {
            reasons.push(format!("name '{}' does not match '{pattern}'", resource.name()));
        }
    }

    if !description.namespaces.is_empty() {
        let namespace = resource.namespace();
        if !description.namespaces.iter().any(|ns| wildcard_match(ns, namespace)) {
            reasons.push(format!("namespace '{namespace}' not in {:?}", description.namespaces));
        }
    }

    if let Some(selector) = &description.selector {
        if !selector.matches(&resource.labels()) {
            reasons.push("labels do not satisfy the selector".to_string());
        }
    }

    if let Some(filter) = &description.user_info {
        reasons.extend(user_info_mismatches(filter, info));
    }

    reasons
}

fn user_info_mismatches(filter: &UserInfoFilter, info: &RequestInfo) -> Vec<String> {
    let mut reasons = Vec::new();

    if !filter.roles.is_empty() && !filter.roles.iter().any(|r| info.roles.contains(r)) {
        reasons.push(format!("caller has none of roles {:?}", filter.roles));
    }
    if !filter.cluster_roles.is_empty() && !filter.cluster_roles.iter().any(|r| info.cluster_roles.contains(r)) {
        reasons.push(format!("caller has none of cluster roles {:?}", filter.cluster_roles));
    }
    if !filter.subjects.is_empty() && !filter.subjects.iter().any(|s| subject_matches(s, info)) {
        reasons.push("caller matches none of the subjects".to_string());
    }

    reasons
}

fn subject_matches(subject: &Subject, info: &RequestInfo) -> bool {
    let user = &info.user_info;
    match subject.kind.as_str() {
        "User" => user.username == subject.name,
        "Group" => user.groups.contains(&subject.name),
        "ServiceAccount" => {
            let namespace = subject.namespace.as_deref().unwrap_or_default();
            user.username == format!("{SERVICE_ACCOUNT_PREFIX}{namespace}:{}", subject.name)
        }
        _ => false,
    }
}
