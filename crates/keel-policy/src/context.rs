//! Evaluation context and per-evaluation policy context.
//!
//! `EvaluationContext` is the JSON document `{{ }}` references resolve
//! against. It is built fresh for every evaluation and never persisted:
//!
//! ```json
//! {
//!   "request": {
//!     "object": { ...the resource... },
//!     "userInfo": { "username": "...", "uid": "...", "groups": [...] },
//!     "roles": [...],
//!     "clusterRoles": [...]
//!   },
//!   "serviceAccountName": "...",
//!   "serviceAccountNamespace": "..."
//! }
//! ```

use serde_json::{json, Value};

use keel_contracts::policy::{Policy, RequestInfo};

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    // Always a mapping with a `request` mapping; index assignment relies on it.
    data: Value,
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self {
            data: json!({ "request": {} }),
        }
    }

    /// Context for `resource` triggered by `info`, with the service-account
    /// identity derived from the caller's username.
    pub fn for_resource(resource: &Value, info: &RequestInfo) -> Self {
        let mut ctx = Self::new();
        ctx.add_resource(resource);
        ctx.add_user_info(info);
        ctx.add_service_account(&info.user_info.username);
        ctx
    }

    /// Set `request.object`. Replaces any previously added resource.
    pub fn add_resource(&mut self, resource: &Value) {
        self.data["request"]["object"] = resource.clone();
    }

    pub fn add_user_info(&mut self, info: &RequestInfo) {
        let request = &mut self.data["request"];
        request["userInfo"] = json!({
            "username": info.user_info.username,
            "uid": info.user_info.uid,
            "groups": info.user_info.groups,
        });
        request["roles"] = json!(info.roles);
        request["clusterRoles"] = json!(info.cluster_roles);
    }

    /// Record `serviceAccountName`/`serviceAccountNamespace` when `username`
    /// has the form `system:serviceaccount:<namespace>:<name>`.
    pub fn add_service_account(&mut self, username: &str) {
        let Some(rest) = username.strip_prefix(SERVICE_ACCOUNT_PREFIX) else {
            return;
        };
        let Some((namespace, name)) = rest.split_once(':') else {
            return;
        };
        self.data["serviceAccountName"] = Value::String(name.to_string());
        self.data["serviceAccountNamespace"] = Value::String(namespace.to_string());
    }

    /// Resolve a dotted path. Numeric segments index into sequences.
    /// `null` values count as unresolved.
    pub fn query(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;
        for segment in path.split('.').map(str::trim) {
            if segment.is_empty() {
                return None;
            }
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }
}

/// Everything one policy evaluation needs.
#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    pub policy: &'a Policy,
    /// The resource as submitted, before any rule of this policy ran.
    pub new_resource: Value,
    pub context: EvaluationContext,
    /// Caller identity. Empty for background passes.
    pub admission_info: RequestInfo,
}

impl<'a> PolicyContext<'a> {
    /// Build a context whose evaluation context is derived from `resource`
    /// and `admission_info`.
    pub fn new(policy: &'a Policy, resource: Value, admission_info: RequestInfo) -> Self {
        let context = EvaluationContext::for_resource(&resource, &admission_info);
        Self {
            policy,
            new_resource: resource,
            context,
            admission_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use keel_contracts::policy::{RequestInfo, UserInfo};

    use super::EvaluationContext;

    fn info(username: &str) -> RequestInfo {
        RequestInfo {
            roles: vec!["team-a:dev".to_string()],
            cluster_roles: vec![],
            user_info: UserInfo {
                username: username.to_string(),
                uid: "u-1".to_string(),
                groups: vec!["system:authenticated".to_string()],
            },
        }
    }

    #[test]
    fn query_resolves_resource_fields() {
        let resource = json!({
            "metadata": { "name": "web", "labels": { "app": "shop" } },
            "spec": { "containers": [{ "name": "nginx" }, { "name": "sidecar" }] }
        });
        let ctx = EvaluationContext::for_resource(&resource, &info("alice"));

        assert_eq!(ctx.query("request.object.metadata.name"), Some(&json!("web")));
        assert_eq!(ctx.query("request.object.spec.containers.1.name"), Some(&json!("sidecar")));
        assert_eq!(ctx.query("request.userInfo.username"), Some(&json!("alice")));
        assert_eq!(ctx.query("request.roles"), Some(&json!(["team-a:dev"])));
        assert_eq!(ctx.query("request.object.metadata.missing"), None);
        assert_eq!(ctx.query("request..object"), None);
    }

    #[test]
    fn service_account_identity_is_derived() {
        let ctx = EvaluationContext::for_resource(&json!({}), &info("system:serviceaccount:kube-system:replicaset-controller"));
        assert_eq!(ctx.query("serviceAccountName"), Some(&json!("replicaset-controller")));
        assert_eq!(ctx.query("serviceAccountNamespace"), Some(&json!("kube-system")));

        let ctx = EvaluationContext::for_resource(&json!({}), &info("alice"));
        assert_eq!(ctx.query("serviceAccountName"), None);
    }

    #[test]
    fn null_values_are_unresolved() {
        let ctx = EvaluationContext::for_resource(&json!({ "spec": { "x": null } }), &RequestInfo::default());
        assert_eq!(ctx.query("request.object.spec.x"), None);
    }

    #[test]
    fn add_resource_replaces_previous_object() {
        let mut ctx = EvaluationContext::new();
        ctx.add_resource(&json!({ "a": 1 }));
        ctx.add_resource(&json!({ "a": 2 }));
        assert_eq!(ctx.query("request.object.a"), Some(&json!(2)));
    }
}
