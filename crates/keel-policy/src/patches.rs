//! Literal RFC 6902 patch application.

use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use keel_contracts::{
    error::{KeelError, KeelResult},
    patch::{unescape_pointer_token, PatchOperation},
    policy::Rule,
    response::{RuleResponse, RuleType},
};

fn patch_error(reason: impl Into<String>) -> KeelError {
    KeelError::Patch { reason: reason.into() }
}

/// Split a JSON pointer into unescaped tokens. `""` is the whole document.
fn parse_pointer(pointer: &str) -> KeelResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(patch_error(format!("invalid path '{pointer}': must start with '/'")));
    };
    Ok(rest.split('/').map(unescape_pointer_token).collect())
}

fn parse_index(token: &str, len: usize, path: &str) -> KeelResult<usize> {
    let index = token
        .parse::<usize>()
        .map_err(|_| patch_error(format!("invalid array index '{token}' in path '{path}'")))?;
    if index < len {
        Ok(index)
    } else {
        Err(patch_error(format!("array index {index} out of bounds in path '{path}'")))
    }
}

fn resolve_mut<'v>(doc: &'v mut Value, tokens: &[String], path: &str) -> KeelResult<&'v mut Value> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| patch_error(format!("path '{path}' does not exist")))?,
            Value::Array(items) => {
                let index = parse_index(token, items.len(), path)?;
                &mut items[index]
            }
            _ => return Err(patch_error(format!("path '{path}' traverses a scalar"))),
        };
    }
    Ok(current)
}

fn get<'v>(doc: &'v Value, path: &str) -> KeelResult<&'v Value> {
    let tokens = parse_pointer(path)?;
    let mut current = doc;
    for token in &tokens {
        current = match current {
            Value::Object(map) => map
                .get(token)
                .ok_or_else(|| patch_error(format!("path '{path}' does not exist")))?,
            Value::Array(items) => &items[parse_index(token, items.len(), path)?],
            _ => return Err(patch_error(format!("path '{path}' traverses a scalar"))),
        };
    }
    Ok(current)
}

fn add(doc: &mut Value, path: &str, value: Value) -> KeelResult<()> {
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, parents, path)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            // Inserting at `len` appends.
            let index = parse_index(last, items.len() + 1, path)?;
            items.insert(index, value);
            Ok(())
        }
        _ => Err(patch_error(format!("cannot add at '{path}': parent is a scalar"))),
    }
}

fn remove(doc: &mut Value, path: &str) -> KeelResult<Value> {
    let tokens = parse_pointer(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        return Err(patch_error("cannot remove the document root"));
    };
    match resolve_mut(doc, parents, path)? {
        Value::Object(map) => map
            .remove(last)
            .ok_or_else(|| patch_error(format!("path '{path}' does not exist"))),
        Value::Array(items) => {
            let index = parse_index(last, items.len(), path)?;
            Ok(items.remove(index))
        }
        _ => Err(patch_error(format!("cannot remove at '{path}': parent is a scalar"))),
    }
}

fn apply_one(doc: &mut Value, operation: &PatchOperation) -> KeelResult<()> {
    match operation {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOperation::Replace { path, value } => {
            let tokens = parse_pointer(path)?;
            *resolve_mut(doc, &tokens, path)? = value.clone();
            Ok(())
        }
        PatchOperation::Test { path, value } => {
            let actual = get(doc, path)?;
            if actual == value {
                Ok(())
            } else {
                Err(patch_error(format!("test failed at '{path}': expected {value}, found {actual}")))
            }
        }
        PatchOperation::Move { from, path } => {
            if path.starts_with(&format!("{from}/")) {
                return Err(patch_error(format!("cannot move '{from}' into its own child '{path}'")));
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOperation::Copy { from, path } => {
            let value = get(doc, from)?.clone();
            add(doc, path, value)
        }
    }
}

/// Apply `operations` in order to a copy of `resource`.
///
/// All-or-nothing: the first failing operation aborts the whole list and
/// `resource` is never modified.
pub fn apply_patches(resource: &Value, operations: &[PatchOperation]) -> KeelResult<Value> {
    let mut patched = resource.clone();
    for (i, operation) in operations.iter().enumerate() {
        apply_one(&mut patched, operation).map_err(|e| match e {
            KeelError::Patch { reason } => patch_error(format!("operation {i} ({operation}): {reason}")),
            other => other,
        })?;
    }
    Ok(patched)
}

/// Apply the rule's literal patch list to `resource`.
///
/// Returns the rule response and the patched resource, or the unmodified
/// resource when any operation fails.
pub fn process_patches(rule: &Rule, resource: &Value) -> (RuleResponse, Value) {
    let started = Instant::now();
    let operations = &rule.mutation.patches;

    let (mut response, patched) = match apply_patches(resource, operations) {
        Ok(patched) => {
            debug!(rule = %rule.name, count = operations.len(), "applied patches");
            let response = RuleResponse {
                name: rule.name.clone(),
                rule_type: RuleType::Mutation,
                success: true,
                message: format!("successfully processed {} patches", operations.len()),
                patches: (!operations.is_empty()).then(|| operations.clone()),
                processing_time: Default::default(),
            };
            (response, patched)
        }
        Err(e) => {
            debug!(rule = %rule.name, error = %e, "patches not applied");
            let response = RuleResponse::failed(&rule.name, RuleType::Mutation, format!("failed to process patches: {e}"));
            (response, resource.clone())
        }
    };
    response.processing_time = started.elapsed();
    (response, patched)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use keel_contracts::{
        error::KeelError,
        patch::PatchOperation,
        policy::{Mutation, Rule},
    };

    use super::{apply_patches, process_patches};

    fn deployment() -> serde_json::Value {
        json!({
            "metadata": { "name": "web", "labels": { "app": "web" }, "annotations": { "a/b": "x" } },
            "spec": { "containers": [{ "name": "app" }, { "name": "sidecar" }] }
        })
    }

    fn ops(value: serde_json::Value) -> Vec<PatchOperation> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn add_replace_remove() {
        let patched = apply_patches(
            &deployment(),
            &ops(json!([
                { "op": "add", "path": "/metadata/labels/tier", "value": "frontend" },
                { "op": "replace", "path": "/metadata/labels/app", "value": "shop" },
                { "op": "remove", "path": "/metadata/annotations/a~1b" },
                { "op": "add", "path": "/spec/containers/-", "value": { "name": "logger" } },
                { "op": "add", "path": "/spec/containers/0", "value": { "name": "init" } }
            ])),
        )
        .unwrap();

        assert_eq!(patched["metadata"]["labels"], json!({ "app": "shop", "tier": "frontend" }));
        assert_eq!(patched["metadata"]["annotations"], json!({}));
        let names: Vec<&str> = patched["spec"]["containers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["init", "app", "sidecar", "logger"]);
    }

    #[test]
    fn move_and_copy() {
        let patched = apply_patches(
            &deployment(),
            &ops(json!([
                { "op": "copy", "from": "/metadata/labels/app", "path": "/metadata/labels/component" },
                { "op": "move", "from": "/spec/containers/1", "path": "/spec/sidecar" }
            ])),
        )
        .unwrap();

        assert_eq!(patched["metadata"]["labels"]["component"], "web");
        assert_eq!(patched["spec"]["sidecar"], json!({ "name": "sidecar" }));
        assert_eq!(patched["spec"]["containers"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn failed_test_aborts_everything() {
        let original = deployment();
        let err = apply_patches(
            &original,
            &ops(json!([
                { "op": "add", "path": "/metadata/labels/tier", "value": "frontend" },
                { "op": "test", "path": "/metadata/labels/app", "value": "api" }
            ])),
        )
        .unwrap_err();

        match err {
            KeelError::Patch { reason } => assert!(reason.starts_with("operation 1"), "{reason}"),
            other => panic!("expected Patch error, got {:?}", other),
        }
        assert!(original["metadata"]["labels"].get("tier").is_none());
    }

    #[test]
    fn invalid_paths_are_errors() {
        assert!(apply_patches(&deployment(), &ops(json!([{ "op": "remove", "path": "/spec/missing" }]))).is_err());
        assert!(apply_patches(&deployment(), &ops(json!([{ "op": "replace", "path": "/spec/containers/9", "value": 1 }])))
            .is_err());
        assert!(apply_patches(&deployment(), &ops(json!([{ "op": "add", "path": "no-slash", "value": 1 }]))).is_err());
        assert!(apply_patches(&deployment(), &ops(json!([{ "op": "add", "path": "/metadata/name/x", "value": 1 }])))
            .is_err());
    }

    #[test]
    fn process_patches_reports_failure_and_keeps_resource() {
        let rule = Rule {
            name: "bad-patch".to_string(),
            mutation: Mutation {
                overlay: None,
                patches: ops(json!([{ "op": "remove", "path": "/spec/nope" }])),
            },
            ..Default::default()
        };

        let (response, patched) = process_patches(&rule, &deployment());
        assert!(!response.success);
        assert!(response.patches.is_none());
        assert!(response.message.contains("/spec/nope"));
        assert_eq!(patched, deployment());
    }

    #[test]
    fn process_patches_returns_applied_operations() {
        let rule = Rule {
            name: "add-tier".to_string(),
            mutation: Mutation {
                overlay: None,
                patches: ops(json!([{ "op": "add", "path": "/metadata/labels/tier", "value": "frontend" }])),
            },
            ..Default::default()
        };

        let (response, patched) = process_patches(&rule, &deployment());
        assert!(response.has_patches());
        assert_eq!(response.patches.as_ref().map(Vec::len), Some(1));
        assert_eq!(patched["metadata"]["labels"]["tier"], "frontend");
    }
}
