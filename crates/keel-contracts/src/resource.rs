//! Accessors for managed objects held as untyped JSON.
//!
//! Resources flow through keel as `serde_json::Value` trees so overlays,
//! templates, and patches can address any field. `ResourceExt` gives the
//! handful of metadata fields the engine actually reads a typed face.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind/namespace/name coordinates of a resource.
///
/// Used both as the identity reported in responses and as the entry type of a
/// GenerateRequest's generated-resource list. An all-empty spec means "nothing
/// was generated".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

impl ResourceSpec {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() && self.namespace.is_empty() && self.name.is_empty()
    }
}

impl std::fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Typed metadata access on an untyped resource.
pub trait ResourceExt {
    fn kind(&self) -> &str;
    fn api_version(&self) -> &str;
    fn name(&self) -> &str;
    fn namespace(&self) -> &str;
    fn labels(&self) -> BTreeMap<String, String>;
    /// `metadata.creationTimestamp` parsed as RFC 3339, if present and valid.
    fn creation_timestamp(&self) -> Option<DateTime<Utc>>;
    fn spec(&self) -> ResourceSpec;

    fn set_name(&mut self, name: &str);
    fn set_namespace(&mut self, namespace: &str);
    fn clear_resource_version(&mut self);
}

fn metadata_str<'v>(value: &'v Value, field: &str) -> &'v str {
    value
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn metadata_mut(value: &mut Value) -> Option<&mut Map<String, Value>> {
    let object = value.as_object_mut()?;
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    metadata.as_object_mut()
}

impl ResourceExt for Value {
    fn kind(&self) -> &str {
        self.get("kind").and_then(Value::as_str).unwrap_or("")
    }

    fn api_version(&self) -> &str {
        self.get("apiVersion").and_then(Value::as_str).unwrap_or("")
    }

    fn name(&self) -> &str {
        metadata_str(self, "name")
    }

    fn namespace(&self) -> &str {
        metadata_str(self, "namespace")
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = metadata_str(self, "creationTimestamp");
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    fn spec(&self) -> ResourceSpec {
        ResourceSpec::new(self.kind(), self.namespace(), self.name())
    }

    fn set_name(&mut self, name: &str) {
        if let Some(metadata) = metadata_mut(self) {
            metadata.insert("name".to_string(), Value::String(name.to_string()));
        }
    }

    fn set_namespace(&mut self, namespace: &str) {
        if let Some(metadata) = metadata_mut(self) {
            if namespace.is_empty() {
                metadata.remove("namespace");
            } else {
                metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
            }
        }
    }

    fn clear_resource_version(&mut self) {
        if let Some(metadata) = self.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.remove("resourceVersion");
        }
    }
}
