//! Collaborator traits for the keel evaluation core.
//!
//! The engine itself does no I/O. Everything it needs from the outside
//! world goes through one of these seams:
//!
//! - `ResourceStore`: get/list/create of managed objects
//! - `PolicyLister`: read-only access to policies by name
//! - `GenerateRequestLister`: read-only access to pending generate work
//! - `StatusControl`: the single terminal status write per pass
//! - `ViolationRecorder`: fire-and-forget violation sink
//! - `EventRecorder`: fire-and-forget event sink
//!
//! Implementations must be `Send + Sync`: workers share them across threads.

use serde_json::Value;

use keel_contracts::{
    error::KeelResult,
    generate::GenerateRequest,
    policy::{LabelSelector, Policy},
    resource::ResourceSpec,
    violation::{Event, ViolationInfo},
};

/// The external resource store.
///
/// Each call is a single request/response. No call carries a timeout of its
/// own; cancellation is the caller's concern.
pub trait ResourceStore: Send + Sync {
    /// Fetch one object. Returns `KeelError::NotFound` when it does not exist.
    fn get(&self, kind: &str, namespace: &str, name: &str) -> KeelResult<Value>;

    /// List objects of `kind`. An empty `namespace` lists across namespaces.
    fn list(&self, kind: &str, namespace: &str, selector: Option<&LabelSelector>) -> KeelResult<Vec<Value>>;

    /// Create `object`. Returns `KeelError::AlreadyExists` on a name conflict.
    /// With `dry_run` the store validates but persists nothing.
    fn create(&self, kind: &str, namespace: &str, object: Value, dry_run: bool) -> KeelResult<Value>;

    /// Map a kind to its plural resource type (`NetworkPolicy` → `networkpolicies`).
    fn kind_to_resource_type(&self, kind: &str) -> String {
        let lower = kind.to_ascii_lowercase();
        if let Some(stem) = lower.strip_suffix('y') {
            format!("{stem}ies")
        } else if lower.ends_with('s') {
            format!("{lower}es")
        } else {
            format!("{lower}s")
        }
    }
}

/// Read-only policy lookup.
pub trait PolicyLister: Send + Sync {
    /// Returns `KeelError::NotFound` when no policy has this name.
    fn get(&self, name: &str) -> KeelResult<Policy>;
}

/// Read-only GenerateRequest lookup.
pub trait GenerateRequestLister: Send + Sync {
    /// Returns `KeelError::NotFound` when no request has this name.
    fn get(&self, name: &str) -> KeelResult<GenerateRequest>;
}

/// Terminal status writes for a GenerateRequest.
///
/// Each method performs exactly one write. Neither may move a request back
/// to the `New` state.
pub trait StatusControl: Send + Sync {
    fn success(&self, request: &GenerateRequest, generated: &[ResourceSpec]) -> KeelResult<()>;
    fn failed(&self, request: &GenerateRequest, message: &str, generated: &[ResourceSpec]) -> KeelResult<()>;
}

/// Fire-and-forget sink for policy violations.
pub trait ViolationRecorder: Send + Sync {
    fn record(&self, info: ViolationInfo);
}

/// Fire-and-forget sink for events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}
