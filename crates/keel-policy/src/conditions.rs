//! Rule precondition evaluation.

use serde_json::Value;
use tracing::{debug, warn};

use keel_contracts::policy::{Condition, ConditionOperator};

use crate::{context::EvaluationContext, variables::substitute_vars};

/// True when every condition holds (AND). An empty list holds.
///
/// Each condition is substituted on a copy, so the rule's own values are
/// never touched. A condition that fails to substitute or evaluate counts as
/// not holding.
pub fn evaluate_conditions(ctx: &EvaluationContext, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| match evaluate_condition(ctx, condition) {
        Ok(holds) => {
            if !holds {
                debug!(operator = ?condition.operator, key = %condition.key, "condition does not hold");
            }
            holds
        }
        Err(reason) => {
            warn!(operator = ?condition.operator, key = %condition.key, reason = %reason, "failed to evaluate condition");
            false
        }
    })
}

fn evaluate_condition(ctx: &EvaluationContext, condition: &Condition) -> Result<bool, String> {
    let key = substitute_vars(ctx, &condition.key).map_err(|e| e.to_string())?;
    let value = substitute_vars(ctx, &condition.value).map_err(|e| e.to_string())?;

    match condition.operator {
        ConditionOperator::Equal => Ok(values_equal(&key, &value)),
        ConditionOperator::NotEqual => Ok(!values_equal(&key, &value)),
        ConditionOperator::In => contained_in(&key, &value),
        ConditionOperator::NotIn => contained_in(&key, &value).map(|found| !found),
    }
}

/// Structural equality, except numbers compare by value (`1` equals `1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// A scalar key must be a member of `set`; a sequence key must have every
/// element in `set`.
fn contained_in(key: &Value, set: &Value) -> Result<bool, String> {
    let Value::Array(members) = set else {
        return Err(format!("operator In/NotIn expects a sequence value, found {set}"));
    };
    let is_member = |item: &Value| members.iter().any(|m| values_equal(item, m));
    match key {
        Value::Array(items) => Ok(items.iter().all(is_member)),
        Value::Object(_) => Err("operator In/NotIn does not accept a mapping key".to_string()),
        scalar => Ok(is_member(scalar)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use keel_contracts::policy::{Condition, ConditionOperator, RequestInfo, UserInfo};

    use super::evaluate_conditions;
    use crate::context::EvaluationContext;

    fn ctx() -> EvaluationContext {
        let info = RequestInfo {
            user_info: UserInfo {
                username: "alice".to_string(),
                groups: vec!["dev".to_string(), "ops".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        EvaluationContext::for_resource(
            &json!({ "metadata": { "name": "web", "labels": { "a": "1" } }, "spec": { "replicas": 2 } }),
            &info,
        )
    }

    fn cond(key: Value, operator: ConditionOperator, value: Value) -> Condition {
        Condition { key, operator, value }
    }

    #[test]
    fn empty_conditions_hold() {
        assert!(evaluate_conditions(&ctx(), &[]));
    }

    #[test]
    fn equality_after_substitution() {
        let c = cond(json!("{{request.object.metadata.labels.a}}"), ConditionOperator::Equal, json!("1"));
        assert!(evaluate_conditions(&ctx(), &[c]));

        let c = cond(json!("{{request.object.spec.replicas}}"), ConditionOperator::Equal, json!(2.0));
        assert!(evaluate_conditions(&ctx(), &[c]));

        let c = cond(json!("{{request.userInfo.username}}"), ConditionOperator::NotEqual, json!("bob"));
        assert!(evaluate_conditions(&ctx(), &[c]));
    }

    #[test]
    fn membership_operators() {
        let c = cond(json!("{{request.userInfo.username}}"), ConditionOperator::In, json!(["alice", "bob"]));
        assert!(evaluate_conditions(&ctx(), &[c]));

        let c = cond(json!("{{request.userInfo.groups}}"), ConditionOperator::In, json!(["dev", "ops", "qa"]));
        assert!(evaluate_conditions(&ctx(), &[c]));

        let c = cond(json!("{{request.userInfo.groups}}"), ConditionOperator::In, json!(["dev"]));
        assert!(!evaluate_conditions(&ctx(), &[c]));

        let c = cond(json!("carol"), ConditionOperator::NotIn, json!(["alice", "bob"]));
        assert!(evaluate_conditions(&ctx(), &[c]));
    }

    #[test]
    fn all_conditions_must_hold() {
        let holds = cond(json!("x"), ConditionOperator::Equal, json!("x"));
        let fails = cond(json!("x"), ConditionOperator::Equal, json!("y"));
        assert!(!evaluate_conditions(&ctx(), &[holds, fails]));
    }

    #[test]
    fn unresolved_variable_skips_rule() {
        let c = cond(json!("{{request.object.metadata.labels.missing}}"), ConditionOperator::NotEqual, json!("x"));
        assert!(!evaluate_conditions(&ctx(), &[c]));
    }

    #[test]
    fn membership_against_scalar_is_an_evaluation_failure() {
        let c = cond(json!("alice"), ConditionOperator::NotIn, json!("alice"));
        assert!(!evaluate_conditions(&ctx(), &[c]));
    }

    #[test]
    fn conditions_are_not_modified() {
        let conditions = vec![cond(json!("{{request.object.metadata.name}}"), ConditionOperator::Equal, json!("web"))];
        let before = conditions.clone();
        assert!(evaluate_conditions(&ctx(), &conditions));
        assert_eq!(conditions, before);
    }
}
