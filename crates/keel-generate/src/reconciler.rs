//! Generate-rule reconciliation.
//!
//! For every generate rule of a policy that selects the triggering resource,
//! resolve the target coordinates, decide whether the target must be created,
//! and create it with a single call to the resource store.
//!
//! Idempotence rests on two checks, not on locking: the target's existence is
//! checked right before creating it, and a request that already reached a
//! terminal state never recreates a missing data-mode target. A concurrent
//! create of the same target is left to the store's conflict detection.

use serde_json::Value;
use tracing::{debug, info};

use keel_contracts::{
    error::{KeelError, KeelResult},
    generate::GenerateRequestState,
    policy::{Generation, Rule},
    resource::{ResourceExt, ResourceSpec},
};
use keel_core::traits::ResourceStore;
use keel_policy::{
    conditions::evaluate_conditions, context::EvaluationContext, matcher::matches_resource_description,
    validate::validate_pattern, variables::substitute_variables, PolicyContext,
};

/// The result of one generate pass.
///
/// `generated` holds every target resolved before `error` (if any) stopped
/// the pass, so a failed status can still report partial progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateOutcome {
    pub generated: Vec<ResourceSpec>,
    pub error: Option<KeelError>,
}

impl GenerateOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: KeelError) -> Self {
        Self {
            generated: Vec::new(),
            error: Some(error),
        }
    }
}

/// Generate rules of the policy that select the triggering resource.
pub fn applicable_rules<'p>(ctx: &PolicyContext<'p>) -> Vec<&'p Rule> {
    ctx.policy
        .rules
        .iter()
        .filter(|rule| rule.has_generate())
        .filter(|rule| {
            matches_resource_description(&ctx.new_resource, rule, &ctx.admission_info).is_ok()
                && evaluate_conditions(&ctx.context, &rule.conditions)
        })
        .collect()
}

/// True when the triggering resource predates the policy. Generation never
/// creates resources for such triggers.
pub fn is_existing_resource(ctx: &PolicyContext<'_>) -> bool {
    match (ctx.new_resource.creation_timestamp(), ctx.policy.creation_timestamp) {
        (Some(resource_created), Some(policy_created)) => resource_created < policy_created,
        _ => false,
    }
}

/// Run every applicable generate rule in order.
///
/// Fails with `PolicyNotApplicable` when no generate rule selects the
/// resource. Stops at the first rule error.
pub fn apply_generate_policy(
    store: &dyn ResourceStore,
    ctx: &PolicyContext<'_>,
    state: GenerateRequestState,
) -> GenerateOutcome {
    let rules = applicable_rules(ctx);
    if rules.is_empty() {
        debug!(policy = %ctx.policy.name, resource = %ctx.new_resource.spec(), "policy does not apply");
        return GenerateOutcome::failed(KeelError::PolicyNotApplicable {
            policy: ctx.policy.name.clone(),
            resource: ctx.new_resource.spec().to_string(),
        });
    }

    let process_existing = is_existing_resource(ctx);
    let mut outcome = GenerateOutcome::default();
    for rule in rules {
        match apply_rule(store, rule, &ctx.context, state, process_existing) {
            Ok(spec) if spec.is_empty() => {}
            Ok(spec) => outcome.generated.push(spec),
            Err(e) => {
                debug!(policy = %ctx.policy.name, rule = %rule.name, error = %e, "generate rule failed");
                outcome.error = Some(e);
                break;
            }
        }
    }
    outcome
}

/// Apply one generate rule.
///
/// Returns the target's coordinates when it exists or was created, and an
/// empty spec when creation was suppressed because the trigger predates the
/// policy.
pub fn apply_rule(
    store: &dyn ResourceStore,
    rule: &Rule,
    ctx: &EvaluationContext,
    state: GenerateRequestState,
    process_existing: bool,
) -> KeelResult<ResourceSpec> {
    let Some(generation) = &rule.generation else {
        return Err(KeelError::InvalidRule {
            rule: rule.name.clone(),
            reason: "rule has no generation block".to_string(),
        });
    };
    let generation = substitute_attributes(generation, ctx);
    let target = ResourceSpec::new(&generation.kind, &generation.namespace, &generation.name);

    let payload = match (&generation.data, &generation.clone) {
        (Some(_), Some(_)) => {
            return Err(KeelError::InvalidRule {
                rule: rule.name.clone(),
                reason: "generation sets both data and clone".to_string(),
            })
        }
        (None, None) => {
            return Err(KeelError::InvalidRule {
                rule: rule.name.clone(),
                reason: "generation sets neither data nor clone".to_string(),
            })
        }
        (Some(data), None) => handle_data(store, &rule.name, &generation, data, ctx, state)?,
        (None, Some(_)) => handle_clone(store, &generation)?,
    };

    let Some(mut payload) = payload else {
        debug!(rule = %rule.name, target = %target, "target already exists");
        return Ok(target);
    };

    if process_existing {
        debug!(rule = %rule.name, target = %target, "trigger predates policy; not creating");
        return Ok(ResourceSpec::default());
    }

    if let Some(object) = payload.as_object_mut() {
        object
            .entry("kind")
            .or_insert_with(|| Value::String(generation.kind.clone()));
    }
    payload.set_name(&generation.name);
    payload.set_namespace(&generation.namespace);
    payload.clear_resource_version();

    store.create(&generation.kind, &generation.namespace, payload, false)?;
    info!(rule = %rule.name, target = %target, "created generated resource");
    Ok(target)
}

/// Resolve variables in the target and clone-source coordinates.
///
/// A field whose substitution does not produce a string keeps its original
/// text. Unresolved references are left in place.
pub fn substitute_attributes(generation: &Generation, ctx: &EvaluationContext) -> Generation {
    let substitute = |field: &str| match substitute_variables(ctx, &Value::String(field.to_string())) {
        Value::String(s) => s,
        _ => field.to_string(),
    };

    let mut resolved = generation.clone();
    resolved.name = substitute(&generation.name);
    resolved.namespace = substitute(&generation.namespace);
    if let Some(clone) = resolved.clone.as_mut() {
        clone.name = substitute(&clone.name);
        clone.namespace = substitute(&clone.namespace);
    }
    resolved
}

/// Data mode. `Ok(None)` means the target exists and contains the template.
fn handle_data(
    store: &dyn ResourceStore,
    rule_name: &str,
    generation: &Generation,
    data: &Value,
    ctx: &EvaluationContext,
    state: GenerateRequestState,
) -> KeelResult<Option<Value>> {
    let template = substitute_variables(ctx, data);

    match store.get(&generation.kind, &generation.namespace, &generation.name) {
        Err(e) if e.is_not_found() => {
            if state.is_terminal() {
                // Processed before: the target was deleted or never created.
                return Err(KeelError::violation(
                    rule_name,
                    KeelError::not_found(&generation.kind, &generation.namespace, &generation.name),
                ));
            }
            match template {
                Value::Object(object) => Ok(Some(Value::Object(object))),
                other => Err(KeelError::ParseFailed {
                    reason: format!("generate data of rule '{rule_name}' must be a mapping, found {other}"),
                }),
            }
        }
        Err(e) => Err(e),
        Ok(existing) => match validate_pattern(&existing, &template) {
            Ok(()) => Ok(None),
            Err(mismatch) => Err(KeelError::ConfigNotFound {
                kind: generation.kind.clone(),
                namespace: generation.namespace.clone(),
                name: generation.name.clone(),
                reason: mismatch.to_string(),
            }),
        },
    }
}

/// Clone mode. `Ok(None)` means the target already exists.
fn handle_clone(store: &dyn ResourceStore, generation: &Generation) -> KeelResult<Option<Value>> {
    match store.get(&generation.kind, &generation.namespace, &generation.name) {
        Ok(_) => return Ok(None),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let source = generation.clone.clone().unwrap_or_default();
    let object = store.get(&generation.kind, &source.namespace, &source.name)?;
    match object {
        object @ Value::Object(_) => Ok(Some(object)),
        other => Err(KeelError::ParseFailed {
            reason: format!("clone source {}/{} is not a mapping: {other}", source.namespace, source.name),
        }),
    }
}
