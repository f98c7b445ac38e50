//! # keel-policy
//!
//! The evaluation core of keel: everything needed to decide how a policy
//! changes a resource, with no I/O.
//!
//! ## Overview
//!
//! - `matcher` decides whether a rule selects a resource (kinds, name and
//!   namespace wildcards, label selector, caller identity, exclusions).
//! - `conditions` evaluates rule preconditions against an
//!   `EvaluationContext`, after `variables` resolves `{{ }}` references.
//! - `overlay` synthesizes the minimal patch that makes a resource match a
//!   partial pattern; `patches` applies literal RFC 6902 operations.
//! - `mutate` runs a policy's rules in order over a threaded resource and
//!   stamps pod controllers through `autogen`.
//! - `engine` loads policy sets from TOML or JSON; `background` scans
//!   existing resources and reports the ones a policy would still change.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use keel_policy::{mutate, PolicyContext, PolicySet};
//!
//! let set = PolicySet::from_file(Path::new("policies.toml"))?;
//! let policy = set.find("add-defaults").unwrap();
//! let response = mutate(&PolicyContext::new(policy, resource, request_info));
//! for patch in response.patches() {
//!     println!("{patch}");
//! }
//! ```

pub mod autogen;
pub mod background;
pub mod conditions;
pub mod context;
pub mod engine;
pub mod matcher;
pub mod mutate;
pub mod overlay;
pub mod patches;
pub mod validate;
pub mod variables;
pub mod wildcard;

pub use autogen::{pod_template_rule, POD_CONTROLLERS, POD_TEMPLATE_ANNOTATION};
pub use background::PolicyController;
pub use conditions::evaluate_conditions;
pub use context::{EvaluationContext, PolicyContext};
pub use engine::PolicySet;
pub use matcher::{matches_resource_description, rule_applies, Mismatch};
pub use mutate::mutate;
pub use overlay::{process_overlay, OverlayError};
pub use patches::{apply_patches, process_patches};
pub use validate::{validate_pattern, PatternMismatch};
pub use variables::{substitute_variables, substitute_vars};

// ── Tests ─────────────────────────────────────────────────────────────────────
