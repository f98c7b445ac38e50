//! Overlay patch synthesis.
//!
//! An overlay is a partial resource. `process_overlay` computes the minimal
//! list of add/replace operations that makes the overlapping fields of a
//! resource look like the overlay, applies it, and leaves every other field
//! alone.
//!
//! Two key conventions change how a mapping key is treated:
//!
//! - `+(name)` inserts `name` only when the resource lacks it. An existing
//!   value is never overwritten, whatever it is.
//! - `(name)` is a conditional anchor. The resource's `name` must satisfy the
//!   anchor value (see `validate::validate_pattern`) or the overlay does not
//!   apply. Inside a single-element sequence pattern the anchor selects which
//!   elements the pattern applies to.

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::debug;

use keel_contracts::{
    patch::{escape_pointer_token, PatchOperation},
    response::{RuleResponse, RuleType},
};

use crate::{
    patches::apply_patches,
    validate::{type_name, validate_pattern, PatternMismatch},
};

/// A structural incompatibility between overlay and resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayError {
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for OverlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "overlay mismatch at {}: {}", self.path, self.reason)
    }
}

impl std::error::Error for OverlayError {}

/// `name` for a `(name)` key.
pub fn conditional_anchor(key: &str) -> Option<&str> {
    if key.starts_with("+(") {
        return None;
    }
    key.strip_prefix('(')?.strip_suffix(')')
}

/// `name` for a `+(name)` key.
pub fn add_if_absent_anchor(key: &str) -> Option<&str> {
    key.strip_prefix("+(")?.strip_suffix(')')
}

/// Copy of `pattern` as it should land in a resource: conditional anchors
/// dropped, `+(name)` keys renamed to `name`.
pub fn strip_anchors(pattern: &Value) -> Value {
    match pattern {
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, child) in fields {
                if conditional_anchor(key).is_some() {
                    continue;
                }
                let name = add_if_absent_anchor(key).unwrap_or(key);
                out.insert(name.to_string(), strip_anchors(child));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_anchors).collect()),
        scalar => scalar.clone(),
    }
}

fn child_path(path: &str, key: &str) -> String {
    format!("{}/{}", path, escape_pointer_token(key))
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Evaluate every conditional anchor reachable through mappings.
///
/// An anchor under a field the resource lacks (or holds as null) cannot be
/// satisfied and fails with "anchored field is missing". Anchors inside
/// existing sequences are not checked here; they filter elements during
/// synthesis instead.
pub fn check_anchors(resource: &Value, pattern: &Value, path: &str) -> Result<(), PatternMismatch> {
    let Value::Object(fields) = pattern else {
        return Ok(());
    };
    let Value::Object(object) = resource else {
        return if resource.is_null() {
            unreachable_anchor(pattern, path)
        } else {
            Ok(())
        };
    };
    for (key, child) in fields {
        if let Some(name) = conditional_anchor(key) {
            let anchor_path = child_path(path, name);
            let Some(actual) = object.get(name) else {
                return Err(missing_anchor(anchor_path));
            };
            validate_pattern(actual, child).map_err(|inner| PatternMismatch {
                path: if inner.path == "/" {
                    anchor_path.clone()
                } else {
                    format!("{anchor_path}{}", inner.path)
                },
                reason: inner.reason,
            })?;
            continue;
        }
        let name = add_if_absent_anchor(key).unwrap_or(key);
        match object.get(name) {
            Some(actual) => check_anchors(actual, child, &child_path(path, name))?,
            None => unreachable_anchor(child, &child_path(path, name))?,
        }
    }
    Ok(())
}

fn missing_anchor(path: String) -> PatternMismatch {
    PatternMismatch {
        path,
        reason: "anchored field is missing".to_string(),
    }
}

/// Fails if `pattern`, about to be added wholesale, carries a conditional
/// anchor anywhere beneath it.
fn unreachable_anchor(pattern: &Value, path: &str) -> Result<(), PatternMismatch> {
    match find_conditional_anchor(pattern, path) {
        Some(anchor_path) => Err(missing_anchor(anchor_path)),
        None => Ok(()),
    }
}

fn find_conditional_anchor(pattern: &Value, path: &str) -> Option<String> {
    match pattern {
        Value::Object(fields) => fields.iter().find_map(|(key, child)| match conditional_anchor(key) {
            Some(name) => Some(child_path(path, name)),
            None => find_conditional_anchor(child, &child_path(path, add_if_absent_anchor(key).unwrap_or(key))),
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| find_conditional_anchor(item, &format!("{path}/{i}"))),
        _ => None,
    }
}

fn has_conditional_anchor(pattern: &Value) -> bool {
    pattern
        .as_object()
        .is_some_and(|fields| fields.keys().any(|k| conditional_anchor(k).is_some()))
}

/// Append to `patches` the operations that make `resource` match `pattern`
/// at `path`.
pub fn synthesize_patches(
    resource: &Value,
    pattern: &Value,
    path: &str,
    patches: &mut Vec<PatchOperation>,
) -> Result<(), OverlayError> {
    match (pattern, resource) {
        (Value::Object(fields), Value::Object(object)) => {
            for (key, child) in fields {
                if conditional_anchor(key).is_some() {
                    continue;
                }
                if let Some(name) = add_if_absent_anchor(key) {
                    if !object.contains_key(name) {
                        patches.push(PatchOperation::Add {
                            path: child_path(path, name),
                            value: strip_anchors(child),
                        });
                    }
                    continue;
                }
                match object.get(key) {
                    Some(actual) => synthesize_patches(actual, child, &child_path(path, key), patches)?,
                    None => patches.push(PatchOperation::Add {
                        path: child_path(path, key),
                        value: strip_anchors(child),
                    }),
                }
            }
            Ok(())
        }
        (Value::Array(elements), Value::Array(items)) => {
            if let [element] = elements.as_slice() {
                if has_conditional_anchor(element) {
                    for (i, item) in items.iter().enumerate() {
                        let item_path = format!("{path}/{i}");
                        if check_anchors(item, element, &item_path).is_ok() {
                            synthesize_patches(item, element, &item_path, patches)?;
                        }
                    }
                    return Ok(());
                }
            }
            for (i, element) in elements.iter().enumerate() {
                let item_path = format!("{path}/{i}");
                // Anchored elements only touch the items they select.
                if check_anchors(items.get(i).unwrap_or(&Value::Null), element, &item_path).is_err() {
                    continue;
                }
                match items.get(i) {
                    Some(item) => synthesize_patches(item, element, &item_path, patches)?,
                    None => patches.push(PatchOperation::Add {
                        path: item_path,
                        value: strip_anchors(element),
                    }),
                }
            }
            Ok(())
        }
        (Value::Object(_) | Value::Array(_), Value::Null) => {
            patches.push(PatchOperation::Replace {
                path: path.to_string(),
                value: strip_anchors(pattern),
            });
            Ok(())
        }
        (Value::Object(_) | Value::Array(_), actual) => Err(OverlayError {
            path: display_path(path),
            reason: format!("expected {}, found {}", type_name(pattern), type_name(actual)),
        }),
        (_, Value::Object(_) | Value::Array(_)) => Err(OverlayError {
            path: display_path(path),
            reason: format!("expected a scalar, found {}", type_name(resource)),
        }),
        (expected, actual) => {
            if expected != actual {
                patches.push(PatchOperation::Replace {
                    path: path.to_string(),
                    value: expected.clone(),
                });
            }
            Ok(())
        }
    }
}

/// Merge `overlay` into `resource`.
///
/// - Anchors not satisfied, or nothing to change: success with `None` patches
///   and the resource unchanged.
/// - Structural incompatibility: failure with a path-qualified message and the
///   resource unchanged.
/// - Otherwise success with the synthesized patches and the patched resource.
pub fn process_overlay(rule_name: &str, overlay: &Value, resource: &Value) -> (RuleResponse, Value) {
    let started = Instant::now();
    let (mut response, patched) = overlay_response(rule_name, overlay, resource);
    response.processing_time = started.elapsed();
    (response, patched)
}

fn overlay_response(rule_name: &str, overlay: &Value, resource: &Value) -> (RuleResponse, Value) {
    let succeeded = |message: String, patches: Option<Vec<PatchOperation>>| RuleResponse {
        name: rule_name.to_string(),
        rule_type: RuleType::Mutation,
        success: true,
        message,
        patches,
        processing_time: Default::default(),
    };
    let failed = |message: String| {
        (
            RuleResponse::failed(rule_name, RuleType::Mutation, message),
            resource.clone(),
        )
    };

    if !overlay.is_object() || !resource.is_object() {
        return failed(format!(
            "failed to apply overlay: expected mapping overlay and resource, found {} and {}",
            type_name(overlay),
            type_name(resource)
        ));
    }

    if let Err(mismatch) = check_anchors(resource, overlay, "") {
        debug!(rule = %rule_name, path = %mismatch.path, "overlay anchors not satisfied");
        return (
            succeeded(format!("overlay conditions not met: {mismatch}"), None),
            resource.clone(),
        );
    }

    let mut patches = Vec::new();
    if let Err(e) = synthesize_patches(resource, overlay, "", &mut patches) {
        debug!(rule = %rule_name, error = %e, "overlay does not fit resource");
        return failed(format!("failed to apply overlay: {e}"));
    }

    if patches.is_empty() {
        return (
            succeeded("resource already satisfies the overlay".to_string(), None),
            resource.clone(),
        );
    }

    match apply_patches(resource, &patches) {
        Ok(patched) => {
            debug!(rule = %rule_name, count = patches.len(), "overlay applied");
            (
                succeeded(format!("successfully processed overlay ({} patches)", patches.len()), Some(patches)),
                patched,
            )
        }
        Err(e) => failed(format!("failed to apply overlay patches: {e}")),
    }
}
