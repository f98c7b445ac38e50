//! Pattern subset validation.
//!
//! `validate_pattern` checks that every field named in a pattern is present
//! in the resource with a matching value. Fields the pattern does not mention
//! are ignored. Used for overlay conditional anchors and for checking an
//! existing generated resource against its declared template.

use serde_json::Value;

use keel_contracts::patch::escape_pointer_token;

use crate::wildcard::wildcard_match;

/// Where and why a resource failed to match a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMismatch {
    /// JSON pointer into the resource. `/` for the root.
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for PatternMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "validation error at path {}: {}", self.path, self.reason)
    }
}

impl std::error::Error for PatternMismatch {}

pub fn validate_pattern(resource: &Value, pattern: &Value) -> Result<(), PatternMismatch> {
    validate_at(resource, pattern, "")
}

fn mismatch(path: &str, reason: impl Into<String>) -> PatternMismatch {
    PatternMismatch {
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        reason: reason.into(),
    }
}

fn validate_at(resource: &Value, pattern: &Value, path: &str) -> Result<(), PatternMismatch> {
    match pattern {
        Value::Object(fields) => {
            let Some(object) = resource.as_object() else {
                return Err(mismatch(path, format!("expected a mapping, found {}", type_name(resource))));
            };
            for (key, child) in fields {
                let child_path = format!("{}/{}", path, escape_pointer_token(key));
                match object.get(key) {
                    Some(value) => validate_at(value, child, &child_path)?,
                    None => return Err(mismatch(&child_path, "field is missing")),
                }
            }
            Ok(())
        }
        Value::Array(elements) => {
            let Some(items) = resource.as_array() else {
                return Err(mismatch(path, format!("expected a sequence, found {}", type_name(resource))));
            };
            // A lone mapping element is a pattern every item must satisfy.
            if let [element @ Value::Object(_)] = elements.as_slice() {
                for (i, item) in items.iter().enumerate() {
                    validate_at(item, element, &format!("{path}/{i}"))?;
                }
                return Ok(());
            }
            if items.len() < elements.len() {
                return Err(mismatch(
                    path,
                    format!("expected at least {} elements, found {}", elements.len(), items.len()),
                ));
            }
            for (i, (item, element)) in items.iter().zip(elements).enumerate() {
                validate_at(item, element, &format!("{path}/{i}"))?;
            }
            Ok(())
        }
        Value::String(expected) => {
            if expected == "*" {
                return if resource.is_null() {
                    Err(mismatch(path, "expected a value, found null"))
                } else {
                    Ok(())
                };
            }
            let actual = match resource {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(mismatch(path, format!("expected {expected:?}, found {}", type_name(other)))),
            };
            if wildcard_match(expected, &actual) {
                Ok(())
            } else {
                Err(mismatch(path, format!("expected {expected:?}, found {actual:?}")))
            }
        }
        Value::Number(expected) => match (expected.as_f64(), resource.as_f64()) {
            (Some(e), Some(a)) if e == a => Ok(()),
            _ => Err(mismatch(path, format!("expected {expected}, found {resource}"))),
        },
        Value::Bool(expected) => match resource.as_bool() {
            Some(actual) if actual == *expected => Ok(()),
            _ => Err(mismatch(path, format!("expected {expected}, found {resource}"))),
        },
        Value::Null => {
            if resource.is_null() {
                Ok(())
            } else {
                Err(mismatch(path, format!("expected null, found {}", type_name(resource))))
            }
        }
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
