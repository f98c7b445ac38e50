//! The mutation orchestrator.
//!
//! Rules run in declared order over a threaded resource: each rule's
//! matcher, conditions, overlay and patches see the resource as already
//! patched by the rules before it. The evaluation context's
//! `request.object` follows the threaded resource so later conditions can
//! observe earlier patches.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info};

use keel_contracts::{
    policy::Rule,
    resource::ResourceExt,
    response::{EngineResponse, PolicyResponse, ResourceIdentity, RuleResponse, RuleType},
};

use crate::{
    autogen::{inject_pod_template_annotation, is_pod_controller},
    conditions::evaluate_conditions,
    context::{EvaluationContext, PolicyContext},
    matcher::matches_resource_description,
    overlay::process_overlay,
    patches::process_patches,
    variables::substitute_vars,
};

/// Apply every mutate rule of `policy_context.policy` to its resource.
pub fn mutate(policy_context: &PolicyContext<'_>) -> EngineResponse {
    let started = Instant::now();
    let policy = policy_context.policy;
    let original = &policy_context.new_resource;
    debug!(policy = %policy.name, kind = %original.kind(), name = %original.name(), "applying mutation rules");

    let mut response = PolicyResponse {
        policy: policy.name.clone(),
        resource: ResourceIdentity {
            kind: original.kind().to_string(),
            api_version: original.api_version().to_string(),
            namespace: original.namespace().to_string(),
            name: original.name().to_string(),
        },
        ..Default::default()
    };

    let mut ctx = policy_context.context.clone();
    let mut patched = original.clone();
    let controller = is_pod_controller(original.kind());
    let background = policy_context.admission_info.is_empty();

    for rule in &policy.rules {
        if !rule.has_mutate() && !controller {
            continue;
        }

        if let Err(mismatch) = matches_resource_description(&patched, rule, &policy_context.admission_info) {
            debug!(policy = %policy.name, rule = %rule.name, reason = %mismatch, "resource does not match rule");
            continue;
        }
        if !evaluate_conditions(&ctx, &rule.conditions) {
            debug!(policy = %policy.name, rule = %rule.name, "rule conditions not satisfied");
            continue;
        }

        if let Some(overlay) = &rule.mutation.overlay {
            match apply_overlay(&ctx, rule, overlay, &patched) {
                Ok((rule_response, next)) => {
                    advance(&mut response, &mut ctx, &mut patched, rule_response, next);
                }
                Err(rule_response) => {
                    response.rules.push(rule_response);
                    continue;
                }
            }
        }

        if !rule.mutation.patches.is_empty() {
            let (rule_response, next) = process_patches(rule, &patched);
            advance(&mut response, &mut ctx, &mut patched, rule_response, next);
        }

        // Background passes over existing resources never stamp the template.
        if background || !controller {
            continue;
        }
        let (rule_response, next) = inject_pod_template_annotation(&rule.name, &patched);
        if !rule_response.success {
            error!(
                policy = %policy.name,
                rule = %rule.name,
                message = %rule_response.message,
                "failed to annotate pod template"
            );
            continue;
        }
        if rule_response.patches.is_some() {
            info!(policy = %policy.name, rule = %rule.name, name = %original.name(), "annotated pod template");
            advance(&mut response, &mut ctx, &mut patched, rule_response, next);
        }
    }

    response.processing_time = started.elapsed();
    debug!(
        policy = %policy.name,
        applied = response.rules_applied_count,
        elapsed_us = response.processing_time.as_micros() as u64,
        "finished mutation rules"
    );

    EngineResponse {
        policy_response: response,
        patched_resource: patched,
    }
}

/// Substitute variables into a copy of the overlay and run it. A
/// substitution failure comes back as the failed rule response.
fn apply_overlay(
    ctx: &EvaluationContext,
    rule: &Rule,
    overlay: &Value,
    resource: &Value,
) -> Result<(RuleResponse, Value), RuleResponse> {
    let overlay = substitute_vars(ctx, overlay).map_err(|e| {
        debug!(rule = %rule.name, error = %e, "overlay substitution failed");
        RuleResponse::failed(&rule.name, RuleType::Mutation, e.to_string())
    })?;
    Ok(process_overlay(&rule.name, &overlay, resource))
}

/// Record a phase outcome. Only a phase that produced patches moves the
/// threaded resource forward and counts as applied.
fn advance(
    response: &mut PolicyResponse,
    ctx: &mut EvaluationContext,
    patched: &mut Value,
    rule_response: RuleResponse,
    next: Value,
) {
    if rule_response.has_patches() {
        *patched = next;
        ctx.add_resource(patched);
        response.rules_applied_count += 1;
    }
    response.rules.push(rule_response);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use keel_contracts::{
        policy::{Condition, ConditionOperator, Mutation, Policy, RequestInfo, ResourceDescription, Rule, UserInfo},
        response::RuleType,
    };

    use super::mutate;
    use crate::{autogen::POD_TEMPLATE_ANNOTATION, context::PolicyContext};

    fn rule(name: &str, kinds: &[&str], overlay: serde_json::Value) -> Rule {
        Rule {
            name: name.to_string(),
            resource_description: ResourceDescription {
                kinds: kinds.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            },
            mutation: Mutation {
                overlay: Some(overlay),
                patches: Vec::new(),
            },
            ..Default::default()
        }
    }

    fn policy(rules: Vec<Rule>) -> Policy {
        Policy {
            name: "p".to_string(),
            creation_timestamp: None,
            rules,
        }
    }

    fn alice() -> RequestInfo {
        RequestInfo {
            user_info: UserInfo {
                username: "alice".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pod() -> serde_json::Value {
        json!({ "apiVersion": "v1", "kind": "Pod", "metadata": { "name": "web", "namespace": "shop" } })
    }

    fn deployment() -> serde_json::Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "shop" },
            "spec": { "template": { "metadata": { "labels": { "app": "web" } } } }
        })
    }

    #[test]
    fn response_identifies_policy_and_resource() {
        let p = policy(vec![]);
        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));
        assert_eq!(resp.policy_response.policy, "p");
        assert_eq!(resp.policy_response.resource.kind, "Pod");
        assert_eq!(resp.policy_response.resource.api_version, "v1");
        assert_eq!(resp.policy_response.resource.namespace, "shop");
        assert!(resp.policy_response.rules.is_empty());
        assert_eq!(resp.patched_resource, pod());
    }

    #[test]
    fn later_rules_see_earlier_patches() {
        let r1 = rule("add-a", &["Pod"], json!({ "metadata": { "labels": { "a": "1" } } }));
        let mut r2 = rule("needs-a", &["Pod"], json!({ "metadata": { "labels": { "b": "2" } } }));
        r2.conditions = vec![Condition {
            key: json!("{{request.object.metadata.labels.a}}"),
            operator: ConditionOperator::Equal,
            value: json!("1"),
        }];
        let p = policy(vec![r1, r2]);

        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));

        assert_eq!(resp.policy_response.rules.len(), 2);
        assert_eq!(resp.policy_response.rules_applied_count, 2);
        assert_eq!(resp.patched_resource["metadata"]["labels"], json!({ "a": "1", "b": "2" }));
    }

    #[test]
    fn already_compliant_rule_is_recorded_but_not_counted() {
        let p = policy(vec![rule("ns", &["Pod"], json!({ "metadata": { "namespace": "shop" } }))]);
        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));

        assert_eq!(resp.policy_response.rules.len(), 1);
        assert!(resp.policy_response.rules[0].success);
        assert!(resp.policy_response.rules[0].patches.is_none());
        assert_eq!(resp.policy_response.rules_applied_count, 0);
    }

    #[test]
    fn substitution_failure_is_rule_scoped() {
        let broken = rule("broken", &["Pod"], json!({ "metadata": { "labels": { "x": "{{request.object.nope}}" } } }));
        let fine = rule("fine", &["Pod"], json!({ "metadata": { "labels": { "y": "ok" } } }));
        let p = policy(vec![broken, fine]);

        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));

        assert_eq!(resp.failed_rules(), vec!["broken"]);
        assert_eq!(resp.policy_response.rules_applied_count, 1);
        assert_eq!(resp.patched_resource["metadata"]["labels"], json!({ "y": "ok" }));
    }

    #[test]
    fn overlay_variables_resolve_against_resource() {
        let p = policy(vec![rule(
            "copy-name",
            &["Pod"],
            json!({ "metadata": { "labels": { "app": "{{request.object.metadata.name}}" } } }),
        )]);
        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));
        assert_eq!(resp.patched_resource["metadata"]["labels"]["app"], "web");
    }

    #[test]
    fn raw_patches_run_after_overlay() {
        let mut r = rule("both", &["Pod"], json!({ "metadata": { "labels": { "a": "1" } } }));
        r.mutation.patches = serde_json::from_value(json!([
            { "op": "test", "path": "/metadata/labels/a", "value": "1" },
            { "op": "add", "path": "/metadata/labels/b", "value": "2" }
        ]))
        .unwrap();
        let p = policy(vec![r]);

        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));
        assert_eq!(resp.policy_response.rules.len(), 2);
        assert_eq!(resp.policy_response.rules_applied_count, 2);
        assert_eq!(resp.patches().len(), 2);
        assert_eq!(resp.patched_resource["metadata"]["labels"], json!({ "a": "1", "b": "2" }));
    }

    #[test]
    fn non_matching_rules_are_skipped() {
        let p = policy(vec![rule("deploy-only", &["Deployment"], json!({ "metadata": { "labels": { "a": "1" } } }))]);
        let resp = mutate(&PolicyContext::new(&p, pod(), alice()));
        assert!(resp.policy_response.rules.is_empty());
        assert_eq!(resp.patched_resource, pod());
    }

    // ── Pod-controller autogen ──────────────────────────────────────────────

    #[test]
    fn controller_with_caller_gets_template_annotation() {
        let p = policy(vec![rule("label", &["Deployment"], json!({ "metadata": { "labels": { "a": "1" } } }))]);
        let resp = mutate(&PolicyContext::new(&p, deployment(), alice()));

        let rules = &resp.policy_response.rules;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].name, "label");
        assert_eq!(rules[1].rule_type, RuleType::Mutation);
        assert_eq!(resp.policy_response.rules_applied_count, 2);
        assert_eq!(
            resp.patched_resource["spec"]["template"]["metadata"]["annotations"][POD_TEMPLATE_ANNOTATION],
            "true"
        );
    }

    #[test]
    fn background_pass_never_annotates() {
        let p = policy(vec![rule("label", &["Deployment"], json!({ "metadata": { "labels": { "a": "1" } } }))]);
        let resp = mutate(&PolicyContext::new(&p, deployment(), RequestInfo::default()));

        assert_eq!(resp.policy_response.rules.len(), 1);
        assert!(resp.patched_resource["spec"]["template"]["metadata"].get("annotations").is_none());
    }

    #[test]
    fn controller_runs_autogen_for_non_mutating_rules() {
        let generate_only = Rule {
            name: "gen".to_string(),
            resource_description: ResourceDescription {
                kinds: vec!["Deployment".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let p = policy(vec![generate_only]);

        let resp = mutate(&PolicyContext::new(&p, deployment(), alice()));
        assert_eq!(resp.policy_response.rules.len(), 1);
        assert_eq!(resp.policy_response.rules[0].name, "gen");

        let pod_policy = policy(vec![Rule {
            name: "gen".to_string(),
            resource_description: ResourceDescription {
                kinds: vec!["Pod".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }]);
        let resp = mutate(&PolicyContext::new(&pod_policy, pod(), alice()));
        assert!(resp.policy_response.rules.is_empty());
    }

    #[test]
    fn policy_is_not_modified() {
        let p = policy(vec![rule(
            "copy-name",
            &["Pod"],
            json!({ "metadata": { "labels": { "app": "{{request.object.metadata.name}}" } } }),
        )]);
        let before = p.clone();
        let _ = mutate(&PolicyContext::new(&p, pod(), alice()));
        assert_eq!(p, before);
    }
}
