//! `{{ path }}` variable substitution over arbitrary JSON values.
//!
//! Two entry points with different failure policies:
//!
//! - `substitute_vars` is strict: any unresolved reference fails the whole
//!   substitution. Used for overlays and conditions.
//! - `substitute_variables` is lenient: an unresolved reference leaves its
//!   string untouched. Used for generate templates and attributes.
//!
//! A string that is exactly one reference (surrounding whitespace aside) is
//! replaced by the referenced value with its type intact. References embedded
//! in a longer string are rendered as text.

use std::ops::Range;

use serde_json::{Map, Value};
use tracing::debug;

use keel_contracts::{
    error::{KeelError, KeelResult},
    patch::escape_pointer_token,
};

use crate::context::EvaluationContext;

/// A reference found in a string: its byte span including braces, and the
/// trimmed path between them.
struct Reference<'s> {
    span: Range<usize>,
    path: &'s str,
}

fn find_references(s: &str) -> Vec<Reference<'_>> {
    let mut refs = Vec::new();
    let mut offset = 0;
    while let Some(open) = s[offset..].find("{{") {
        let start = offset + open;
        let Some(close) = s[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        refs.push(Reference {
            span: start..end,
            path: s[start + 2..end - 2].trim(),
        });
        offset = end;
    }
    refs
}

/// True if `s` contains at least one `{{ }}` reference.
pub fn has_variables(s: &str) -> bool {
    !find_references(s).is_empty()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute one string. Unresolved paths are appended to `unresolved`
/// (qualified with `location`) and their text is left in place.
fn substitute_str(ctx: &EvaluationContext, s: &str, location: &str, unresolved: &mut Vec<String>) -> Value {
    let refs = find_references(s);
    if refs.is_empty() {
        return Value::String(s.to_string());
    }

    if refs.len() == 1 && s.trim() == &s[refs[0].span.clone()] {
        return match ctx.query(refs[0].path) {
            Some(value) => value.clone(),
            None => {
                unresolved.push(format!("{} at {}", refs[0].path, location_or_root(location)));
                Value::String(s.to_string())
            }
        };
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for reference in &refs {
        out.push_str(&s[last..reference.span.start]);
        match ctx.query(reference.path) {
            Some(value) => out.push_str(&render(value)),
            None => {
                unresolved.push(format!("{} at {}", reference.path, location_or_root(location)));
                out.push_str(&s[reference.span.clone()]);
            }
        }
        last = reference.span.end;
    }
    out.push_str(&s[last..]);
    Value::String(out)
}

fn location_or_root(location: &str) -> &str {
    if location.is_empty() {
        "/"
    } else {
        location
    }
}

fn walk(ctx: &EvaluationContext, value: &Value, location: &str, unresolved: &mut Vec<String>) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                let child_location = format!("{}/{}", location, escape_pointer_token(key));
                out.insert(key.clone(), walk(ctx, child, &child_location, unresolved));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, child)| walk(ctx, child, &format!("{location}/{i}"), unresolved))
                .collect(),
        ),
        Value::String(s) => substitute_str(ctx, s, location, unresolved),
        scalar => scalar.clone(),
    }
}

/// Strict substitution. Fails with `KeelError::Substitution` naming every
/// unresolved reference.
pub fn substitute_vars(ctx: &EvaluationContext, value: &Value) -> KeelResult<Value> {
    let mut unresolved = Vec::new();
    let substituted = walk(ctx, value, "", &mut unresolved);
    if unresolved.is_empty() {
        Ok(substituted)
    } else {
        Err(KeelError::Substitution {
            reason: format!("variable(s) not found or have nil values: [{}]", unresolved.join(", ")),
        })
    }
}

/// Lenient substitution. Unresolved references stay as written.
pub fn substitute_variables(ctx: &EvaluationContext, value: &Value) -> Value {
    let mut unresolved = Vec::new();
    let substituted = walk(ctx, value, "", &mut unresolved);
    if !unresolved.is_empty() {
        debug!(unresolved = ?unresolved, "leaving unresolved variables in place");
    }
    substituted
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use keel_contracts::{error::KeelError, policy::RequestInfo};

    use super::{has_variables, substitute_variables, substitute_vars};
    use crate::context::EvaluationContext;

    fn ctx() -> EvaluationContext {
        EvaluationContext::for_resource(
            &json!({
                "metadata": { "name": "web", "namespace": "shop", "labels": { "replicas": "3" } },
                "spec": { "replicas": 3, "selector": { "app": "web" } }
            }),
            &RequestInfo::default(),
        )
    }

    #[test]
    fn whole_string_reference_keeps_type() {
        let out = substitute_vars(&ctx(), &json!({
            "count": "{{request.object.spec.replicas}}",
            "selector": "{{ request.object.spec.selector }}"
        }))
        .unwrap();
        assert_eq!(out, json!({ "count": 3, "selector": { "app": "web" } }));
    }

    #[test]
    fn embedded_references_render_as_text() {
        let out = substitute_vars(
            &ctx(),
            &json!(["{{request.object.metadata.namespace}}-{{request.object.metadata.name}}-quota", "x={{request.object.spec.replicas}}"]),
        )
        .unwrap();
        assert_eq!(out, json!(["shop-web-quota", "x=3"]));
    }

    #[test]
    fn plain_values_pass_through() {
        let input = json!({ "a": "plain", "b": 1, "c": [true, null], "d": "{ not a ref }" });
        assert_eq!(substitute_vars(&ctx(), &input).unwrap(), input);
    }

    #[test]
    fn strict_substitution_reports_every_missing_path() {
        let err = substitute_vars(
            &ctx(),
            &json!({ "spec": { "a": "{{request.object.nope}}", "b": ["{{request.userInfo.missing}}"] } }),
        )
        .unwrap_err();

        match err {
            KeelError::Substitution { reason } => {
                assert!(reason.contains("request.object.nope at /spec/a"), "{reason}");
                assert!(reason.contains("request.userInfo.missing at /spec/b/0"), "{reason}");
            }
            other => panic!("expected Substitution, got {:?}", other),
        }
    }

    #[test]
    fn lenient_substitution_keeps_unresolved_text() {
        let out = substitute_variables(
            &ctx(),
            &json!({ "name": "{{request.object.nope}}", "ns": "{{request.object.metadata.namespace}}" }),
        );
        assert_eq!(out, json!({ "name": "{{request.object.nope}}", "ns": "shop" }));
    }

    #[test]
    fn unterminated_braces_are_literal() {
        assert!(!has_variables("{{request.object"));
        assert!(has_variables("prefix {{ a.b }}"));
    }
}
