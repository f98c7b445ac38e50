//! In-memory implementations of `ResourceStore` and `PolicyLister`.
//!
//! `InMemoryResourceStore` is the reference store: objects are keyed by
//! (resource type, namespace, name) behind an `RwLock`, `create` enforces
//! name uniqueness the way a real API server's conflict detection would, and
//! every successful create bumps a counter tests can assert on.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        PoisonError, RwLock,
    },
};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use keel_contracts::{
    error::{KeelError, KeelResult},
    policy::{LabelSelector, Policy},
    resource::ResourceExt,
};

use crate::traits::{PolicyLister, ResourceStore};

type ObjectKey = (String, String, String);

#[derive(Default)]
pub struct InMemoryResourceStore {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    resource_version: AtomicU64,
    creates: AtomicU64,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, kind: &str, namespace: &str, name: &str) -> ObjectKey {
        (self.kind_to_resource_type(kind), namespace.to_string(), name.to_string())
    }

    /// Seed an object directly, bypassing `create`. Replaces any existing
    /// object with the same coordinates.
    pub fn insert(&self, object: Value) {
        let key = self.key(object.kind(), object.namespace(), object.name());
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, object);
    }

    /// Remove an object, returning it if it existed.
    pub fn remove(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        let key = self.key(kind, namespace, name);
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
    }

    /// Number of successful, non-dry-run `create` calls.
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceStore for InMemoryResourceStore {
    fn get(&self, kind: &str, namespace: &str, name: &str) -> KeelResult<Value> {
        let key = self.key(kind, namespace, name);
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .ok_or_else(|| KeelError::not_found(kind, namespace, name))
    }

    fn list(&self, kind: &str, namespace: &str, selector: Option<&LabelSelector>) -> KeelResult<Vec<Value>> {
        let resource_type = self.kind_to_resource_type(kind);
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects
            .iter()
            .filter(|((t, ns, _), _)| *t == resource_type && (namespace.is_empty() || ns == namespace))
            .filter(|(_, obj)| selector.map_or(true, |s| s.matches(&obj.labels())))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    fn create(&self, kind: &str, namespace: &str, mut object: Value, dry_run: bool) -> KeelResult<Value> {
        if !object.is_object() {
            return Err(KeelError::Store {
                reason: format!("cannot create {kind}: object is not a mapping"),
            });
        }
        object.set_namespace(namespace);
        let name = object.name().to_string();
        if name.is_empty() {
            return Err(KeelError::Store {
                reason: format!("cannot create {kind}: metadata.name is required"),
            });
        }

        let key = self.key(kind, namespace, &name);
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        if objects.contains_key(&key) {
            return Err(KeelError::AlreadyExists {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name,
            });
        }

        if let Some(map) = object.as_object_mut() {
            map.entry("kind").or_insert_with(|| Value::String(kind.to_string()));
        }
        let version = self.resource_version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            metadata.insert("resourceVersion".to_string(), Value::String(version.to_string()));
            metadata
                .entry("creationTimestamp")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        if dry_run {
            return Ok(object);
        }

        debug!(kind = %kind, namespace = %namespace, name = %name, "stored object");
        objects.insert(key, object.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }
}

/// Policies held in a map, keyed by name.
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<String, Policy>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: Policy) {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(policy.name.clone(), policy);
    }
}

impl PolicyLister for InMemoryPolicyStore {
    fn get(&self, name: &str) -> KeelResult<Policy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| KeelError::not_found("Policy", "", name))
    }
}
