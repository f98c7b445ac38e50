//! Built-in pod-template annotation for pod controllers.

use serde_json::{json, Value};

use keel_contracts::{
    policy::{Mutation, Rule},
    response::RuleResponse,
};

use crate::overlay::process_overlay;

/// Kinds that embed a pod template at `spec.template`.
pub const POD_CONTROLLERS: [&str; 4] = ["DaemonSet", "Deployment", "Job", "StatefulSet"];

/// Annotation recording that autogen mutation ran on a pod template.
pub const POD_TEMPLATE_ANNOTATION: &str = "pod-policies.kyverno.io/autogen-applied";

pub const POD_TEMPLATE_RULE_NAME: &str = "autogen-annotate-podtemplate";

pub fn is_pod_controller(kind: &str) -> bool {
    POD_CONTROLLERS.contains(&kind)
}

/// A fresh copy of the built-in rule that inserts
/// `pod-policies.kyverno.io/autogen-applied: "true"` on the pod template
/// unless the annotation is already present.
pub fn pod_template_rule() -> Rule {
    Rule {
        name: POD_TEMPLATE_RULE_NAME.to_string(),
        mutation: Mutation {
            overlay: Some(json!({
                "spec": {
                    "template": {
                        "metadata": {
                            "annotations": {
                                format!("+({POD_TEMPLATE_ANNOTATION})"): "true"
                            }
                        }
                    }
                }
            })),
            patches: Vec::new(),
        },
        ..Default::default()
    }
}

/// Run the built-in overlay against `resource`, reporting under `rule_name`.
pub fn inject_pod_template_annotation(rule_name: &str, resource: &Value) -> (RuleResponse, Value) {
    let rule = pod_template_rule();
    let overlay = rule.mutation.overlay.unwrap_or_default();
    process_overlay(rule_name, &overlay, resource)
}
