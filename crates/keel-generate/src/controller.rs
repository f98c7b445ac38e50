//! The GenerateRequest controller.
//!
//! One reconciliation of a request key:
//!
//! 1. Fetch the triggering resource. If it is not there yet the error goes
//!    back to the queue for retry and no status is written.
//! 2. Run the generate pass for the request's policy.
//! 3. Record a violation for a `Violation` error and emit events.
//! 4. Write exactly one terminal status.

use std::sync::Arc;

use tracing::{debug, warn};

use keel_contracts::{
    error::{KeelError, KeelResult},
    generate::GenerateRequest,
    resource::ResourceSpec,
    response::RuleType,
    violation::{Event, EventReason, ViolatedRule, ViolationInfo},
};
use keel_core::{
    traits::{EventRecorder, GenerateRequestLister, PolicyLister, ResourceStore, StatusControl, ViolationRecorder},
    worker::Reconciler,
};
use keel_policy::PolicyContext;

use crate::{
    reconciler::{apply_generate_policy, GenerateOutcome},
    status::update_status,
};

pub struct GenerateController {
    store: Arc<dyn ResourceStore>,
    policies: Arc<dyn PolicyLister>,
    requests: Arc<dyn GenerateRequestLister>,
    status: Arc<dyn StatusControl>,
    violations: Arc<dyn ViolationRecorder>,
    events: Arc<dyn EventRecorder>,
}

impl GenerateController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        policies: Arc<dyn PolicyLister>,
        requests: Arc<dyn GenerateRequestLister>,
        status: Arc<dyn StatusControl>,
        violations: Arc<dyn ViolationRecorder>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            store,
            policies,
            requests,
            status,
            violations,
            events,
        }
    }

    /// Process one request and write its terminal status.
    pub fn process_request(&self, request: &GenerateRequest) -> KeelResult<()> {
        let trigger = &request.spec.resource;
        let resource = match self.store.get(&trigger.kind, &trigger.namespace, &trigger.name) {
            Ok(resource) => resource,
            Err(e) => {
                debug!(request = %request.name, trigger = %trigger, error = %e, "trigger not available; requeuing");
                return Err(e);
            }
        };

        let outcome = self.generate(request, resource);
        if let Some(KeelError::Violation { rule, .. }) = &outcome.error {
            self.violations.record(ViolationInfo {
                policy_name: request.spec.policy.clone(),
                resource: trigger.clone(),
                rules: vec![ViolatedRule {
                    name: rule.clone(),
                    rule_type: RuleType::Generation,
                    message: outcome.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                }],
                blocked: false,
            });
        }
        self.report_events(request, &outcome);

        update_status(self.status.as_ref(), request, outcome.error.as_ref(), &outcome.generated)
    }

    fn generate(&self, request: &GenerateRequest, resource: serde_json::Value) -> GenerateOutcome {
        let policy = match self.policies.get(&request.spec.policy) {
            Ok(policy) => policy,
            Err(e) if e.is_not_found() => {
                debug!(request = %request.name, policy = %request.spec.policy, "policy no longer exists");
                return GenerateOutcome::default();
            }
            Err(e) => {
                return GenerateOutcome {
                    generated: Vec::new(),
                    error: Some(e),
                }
            }
        };

        let info = request.spec.context.user_request_info.clone();
        let ctx = PolicyContext::new(&policy, resource, info);
        apply_generate_policy(self.store.as_ref(), &ctx, request.status.state)
    }

    fn report_events(&self, request: &GenerateRequest, outcome: &GenerateOutcome) {
        let trigger = request.spec.resource.clone();
        let policy = ResourceSpec::new("Policy", "", &request.spec.policy);

        match &outcome.error {
            Some(e) => {
                let reason = if e.is_violation() {
                    EventReason::PolicyViolation
                } else {
                    EventReason::PolicyFailed
                };
                self.events.record(Event {
                    target: trigger.clone(),
                    reason,
                    message: format!("policy '{}' failed to generate resources: {e}", request.spec.policy),
                });
                self.events.record(Event {
                    target: policy,
                    reason,
                    message: format!("failed to generate resources for {trigger}: {e}"),
                });
            }
            None => {
                for generated in &outcome.generated {
                    self.events.record(Event {
                        target: trigger.clone(),
                        reason: EventReason::PolicyApplied,
                        message: format!("policy '{}' generated {generated}", request.spec.policy),
                    });
                }
            }
        }
    }
}

impl Reconciler<String> for GenerateController {
    fn reconcile(&self, key: &String) -> KeelResult<()> {
        let request = match self.requests.get(key) {
            Ok(request) => request,
            Err(e) if e.is_not_found() => {
                warn!(request = %key, "generate request in work queue no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.process_request(&request)
    }
}
