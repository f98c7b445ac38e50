//! Error types for the keel evaluation and reconciliation pipeline.
//!
//! Every fallible operation returns `KeelResult<T>`. Callers decide how to
//! react by matching on the variant, never by inspecting the message text:
//! `Violation` produces a durable policy-violation record, the referential
//! variants abort one rule's generation, and everything else is handed back to
//! the work queue for bounded retry.

use thiserror::Error;

/// The unified error type for keel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeelError {
    /// A template or document could not be converted to structured form.
    #[error("failed to parse: {reason}")]
    ParseFailed { reason: String },

    /// A referenced resource does not exist in the resource store.
    #[error("resource {kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// An existing resource no longer contains the declared configuration.
    #[error("configuration not present in resource {kind} {namespace}/{name}: {reason}")]
    ConfigNotFound {
        kind: String,
        namespace: String,
        name: String,
        reason: String,
    },

    /// A semantic policy failure that must be durably recorded.
    #[error("policy violation in rule '{rule}': {cause}")]
    Violation { rule: String, cause: Box<KeelError> },

    /// A `{{ }}` reference could not be resolved against the evaluation context.
    #[error("variable substitution failed: {reason}")]
    Substitution { reason: String },

    /// A patch operation could not be applied.
    #[error("patch failed: {reason}")]
    Patch { reason: String },

    /// A rule is structurally unusable (for example both data and clone set).
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// The resource store rejected a create because the object already exists.
    #[error("resource {kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Transient or infrastructure failure talking to the resource store.
    #[error("resource store error: {reason}")]
    Store { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// None of the policy's generate rules match the triggering resource.
    #[error("policy '{policy}' does not apply to resource {resource}")]
    PolicyNotApplicable { policy: String, resource: String },
}

impl KeelError {
    /// Build a `NotFound` from resource coordinates.
    pub fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Wrap `cause` as a violation of `rule`.
    pub fn violation(rule: impl Into<String>, cause: KeelError) -> Self {
        Self::Violation {
            rule: rule.into(),
            cause: Box::new(cause),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }
}

/// Convenience alias used throughout the keel crates.
pub type KeelResult<T> = Result<T, KeelError>;
