//! Background scan of existing resources against a policy.
//!
//! Existing resources are never modified in place. A resource that the
//! policy would still patch is reported as a violation instead.

use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use tracing::{debug, info, warn};

use keel_contracts::{
    error::KeelResult,
    policy::{Policy, RequestInfo},
    resource::{ResourceExt, ResourceSpec},
    response::RuleType,
    violation::{ViolatedRule, ViolationInfo},
};
use keel_core::{
    traits::{PolicyLister, ResourceStore, ViolationRecorder},
    worker::Reconciler,
};

use crate::{context::PolicyContext, mutate::mutate, wildcard::wildcard_match};

/// Reconciler keyed by policy name.
pub struct PolicyController {
    store: Arc<dyn ResourceStore>,
    policies: Arc<dyn PolicyLister>,
    violations: Arc<dyn ViolationRecorder>,
}

impl PolicyController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        policies: Arc<dyn PolicyLister>,
        violations: Arc<dyn ViolationRecorder>,
    ) -> Self {
        Self {
            store,
            policies,
            violations,
        }
    }

    /// Every existing resource any mutate rule of `policy` selects, each
    /// listed once.
    fn candidates(&self, policy: &Policy) -> KeelResult<Vec<Value>> {
        let mut seen = HashSet::new();
        let mut resources = Vec::new();
        for rule in policy.mutate_rules() {
            let description = &rule.resource_description;
            for kind in &description.kinds {
                let listed = self.store.list(kind, "", description.selector.as_ref())?;
                for resource in listed {
                    if let Some(pattern) = description.name.as_deref() {
                        if !wildcard_match(pattern, resource.name()) {
                            continue;
                        }
                    }
                    if seen.insert(resource.spec()) {
                        resources.push(resource);
                    }
                }
            }
        }
        Ok(resources)
    }

    /// Evaluate `policy` against every candidate and record violations.
    /// Returns how many violations were recorded.
    pub fn process_policy(&self, policy: &Policy) -> KeelResult<usize> {
        let mut recorded = 0;
        for resource in self.candidates(policy)? {
            let response = mutate(&PolicyContext::new(policy, resource, RequestInfo::default()));
            let rules: Vec<ViolatedRule> = response
                .policy_response
                .rules
                .iter()
                .filter(|r| r.has_patches())
                .map(|r| ViolatedRule {
                    name: r.name.clone(),
                    rule_type: RuleType::Mutation,
                    message: format!("resource would be mutated: {}", r.message),
                })
                .collect();
            if rules.is_empty() {
                continue;
            }

            let identity = &response.policy_response.resource;
            let target = ResourceSpec::new(&identity.kind, &identity.namespace, &identity.name);
            info!(policy = %policy.name, resource = %target, rules = rules.len(), "existing resource violates policy");
            self.violations.record(ViolationInfo {
                policy_name: policy.name.clone(),
                resource: target,
                rules,
                blocked: false,
            });
            recorded += 1;
        }
        Ok(recorded)
    }
}

impl Reconciler<String> for PolicyController {
    fn reconcile(&self, key: &String) -> KeelResult<()> {
        let policy = match self.policies.get(key) {
            Ok(policy) => policy,
            Err(e) if e.is_not_found() => {
                warn!(policy = %key, "policy in work queue no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let recorded = self.process_policy(&policy)?;
        debug!(policy = %key, violations = recorded, "processed policy on existing resources");
        Ok(())
    }
}
