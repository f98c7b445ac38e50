//! # keel-generate
//!
//! Generate-rule reconciliation for keel: materialize the resources a
//! policy's generate rules declare for a triggering resource, and track the
//! outcome on a durable GenerateRequest.
//!
//! ## Overview
//!
//! - `reconciler` resolves each generate rule's target and decides between
//!   creating it (data template or clone source), accepting an existing one,
//!   or raising `ConfigNotFound`, `NotFound` or a `Violation`.
//! - `status` writes the single terminal status of a pass.
//! - `controller` ties both to the work queue as a `Reconciler<String>` keyed
//!   by request name.
//!
//! A request moves from `New` to `Completed` or `Failed` and never back. A
//! terminal request that is delivered again is a replay: a data-mode target
//! that has gone missing is reported as a violation, not recreated.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let controller = Arc::new(GenerateController::new(store, policies, requests.clone(), requests, violations, events));
//! let queue = Arc::new(RateLimitingQueue::new(Box::new(
//!     ItemExponentialFailureRateLimiter::new(config.base_delay(), config.max_delay()),
//! )));
//! let handle = WorkerPool::new("generate", queue.clone(), &config).start(controller)?;
//! queue.add(request.name.clone());
//! ```

pub mod controller;
pub mod reconciler;
pub mod status;

pub use controller::GenerateController;
pub use reconciler::{apply_generate_policy, apply_rule, GenerateOutcome};
pub use status::{update_status, InMemoryGenerateRequestStore};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use keel_audit::{InMemoryEventRecorder, InMemoryViolationRecorder};
    use keel_contracts::{
        error::KeelError,
        generate::{GenerateRequest, GenerateRequestState},
        policy::{CloneFrom, Generation, Policy, RequestInfo, ResourceDescription, Rule, UserInfo},
        resource::ResourceSpec,
        violation::EventReason,
    };
    use keel_core::{
        traits::ResourceStore, worker::Reconciler, ControllerConfig, InMemoryPolicyStore, InMemoryResourceStore,
        ItemExponentialFailureRateLimiter, RateLimitingQueue, WorkerPool,
    };

    use crate::{GenerateController, InMemoryGenerateRequestStore};

    // ── Harness ───────────────────────────────────────────────────────────────

    struct Harness {
        store: Arc<InMemoryResourceStore>,
        requests: Arc<InMemoryGenerateRequestStore>,
        violations: Arc<InMemoryViolationRecorder>,
        events: Arc<InMemoryEventRecorder>,
        controller: Arc<GenerateController>,
    }

    impl Harness {
        fn new(policy: Policy) -> Self {
            let store = Arc::new(InMemoryResourceStore::new());
            let policies = Arc::new(InMemoryPolicyStore::new());
            policies.insert(policy);
            let requests = Arc::new(InMemoryGenerateRequestStore::new());
            let violations = Arc::new(InMemoryViolationRecorder::new());
            let events = Arc::new(InMemoryEventRecorder::new());
            let controller = Arc::new(GenerateController::new(
                store.clone(),
                policies,
                requests.clone(),
                requests.clone(),
                violations.clone(),
                events.clone(),
            ));
            Self {
                store,
                requests,
                violations,
                events,
                controller,
            }
        }

        fn submit(&self) -> String {
            let info = RequestInfo {
                user_info: UserInfo {
                    username: "alice".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            };
            let request = GenerateRequest::new("namespace-defaults", ResourceSpec::new("Namespace", "", "shop"), info);
            let name = request.name.clone();
            self.requests.insert(request);
            name
        }

        fn state(&self, name: &str) -> GenerateRequestState {
            self.requests.status(name).map(|s| s.state).unwrap_or_default()
        }
    }

    fn namespace(created: &str) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "shop", "creationTimestamp": created }
        })
    }

    fn policy(generation: Generation) -> Policy {
        Policy {
            name: "namespace-defaults".to_string(),
            creation_timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            rules: vec![Rule {
                name: "defaults".to_string(),
                resource_description: ResourceDescription {
                    kinds: vec!["Namespace".to_string()],
                    ..Default::default()
                },
                generation: Some(generation),
                ..Default::default()
            }],
        }
    }

    fn data_generation() -> Generation {
        Generation {
            kind: "ConfigMap".to_string(),
            name: "settings".to_string(),
            namespace: "{{request.object.metadata.name}}".to_string(),
            data: Some(json!({ "data": { "owner": "{{request.userInfo.username}}" } })),
            clone: None,
        }
    }

    // ── 1. data mode, first pass ──────────────────────────────────────────────

    #[test]
    fn data_first_pass_creates_and_completes() {
        let h = Harness::new(policy(data_generation()));
        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        let name = h.submit();

        h.controller.reconcile(&name).unwrap();

        assert_eq!(h.state(&name), GenerateRequestState::Completed);
        let status = h.requests.status(&name).unwrap();
        assert_eq!(status.generated_resources, vec![ResourceSpec::new("ConfigMap", "shop", "settings")]);

        let created = h.store.get("ConfigMap", "shop", "settings").unwrap();
        assert_eq!(created["data"]["owner"], "alice");
        assert_eq!(h.store.create_count(), 1);

        let events = h.events.export_log();
        assert_eq!(events.len(), 1);
        assert_eq!(events.records[0].payload.reason, EventReason::PolicyApplied);
        assert!(h.violations.is_empty());
    }

    // ── 2. data mode, replay ──────────────────────────────────────────────────

    #[test]
    fn replay_with_missing_target_is_a_violation_not_a_recreate() {
        let h = Harness::new(policy(data_generation()));
        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        let name = h.submit();

        h.controller.reconcile(&name).unwrap();
        assert_eq!(h.state(&name), GenerateRequestState::Completed);

        h.store.remove("ConfigMap", "shop", "settings");
        h.controller.reconcile(&name).unwrap();

        assert_eq!(h.state(&name), GenerateRequestState::Failed);
        assert_eq!(h.store.create_count(), 1);
        assert!(h.store.get("ConfigMap", "shop", "settings").unwrap_err().is_not_found());

        let violations = h.violations.for_policy("namespace-defaults");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].resource, ResourceSpec::new("Namespace", "", "shop"));
        assert_eq!(violations[0].rules[0].name, "defaults");
        assert!(!violations[0].blocked);

        let reasons: Vec<EventReason> = h.events.export_log().payloads().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![EventReason::PolicyApplied, EventReason::PolicyViolation, EventReason::PolicyViolation]
        );

        // A further replay stays terminal.
        h.controller.reconcile(&name).unwrap();
        assert_eq!(h.state(&name), GenerateRequestState::Failed);
        assert_eq!(h.store.create_count(), 1);
    }

    // ── 3. clone mode, missing source ─────────────────────────────────────────

    #[test]
    fn clone_missing_source_fails_without_creating() {
        let h = Harness::new(policy(Generation {
            kind: "Secret".to_string(),
            name: "registry".to_string(),
            namespace: "shop".to_string(),
            data: None,
            clone: Some(CloneFrom {
                namespace: "platform".to_string(),
                name: "registry".to_string(),
            }),
        }));
        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        let name = h.submit();

        h.controller.reconcile(&name).unwrap();

        let status = h.requests.status(&name).unwrap();
        assert_eq!(status.state, GenerateRequestState::Failed);
        assert_eq!(status.message, KeelError::not_found("Secret", "platform", "registry").to_string());
        assert_eq!(h.store.create_count(), 0);
        assert!(h.violations.is_empty());
    }

    // ── 4. processExisting suppression ────────────────────────────────────────

    #[test]
    fn trigger_older_than_policy_completes_without_creating() {
        let h = Harness::new(policy(data_generation()));
        h.store.insert(namespace("2024-01-01T00:00:00Z"));
        let name = h.submit();

        h.controller.reconcile(&name).unwrap();

        let status = h.requests.status(&name).unwrap();
        assert_eq!(status.state, GenerateRequestState::Completed);
        assert!(status.generated_resources.is_empty());
        assert_eq!(h.store.create_count(), 0);
    }

    // ── 5. trigger not yet visible ────────────────────────────────────────────

    #[test]
    fn missing_trigger_is_retried_without_status_write() {
        let h = Harness::new(policy(data_generation()));
        let name = h.submit();

        let err = h.controller.reconcile(&name).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(h.requests.status_writes(), 0);
        assert_eq!(h.state(&name), GenerateRequestState::New);

        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        h.controller.reconcile(&name).unwrap();
        assert_eq!(h.state(&name), GenerateRequestState::Completed);
        assert_eq!(h.requests.status_writes(), 1);
    }

    // ── 6. missing policy and request ─────────────────────────────────────────

    #[test]
    fn missing_policy_completes_with_nothing() {
        let h = Harness::new(Policy {
            name: "some-other-policy".to_string(),
            ..Default::default()
        });
        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        let name = h.submit();

        h.controller.reconcile(&name).unwrap();
        let status = h.requests.status(&name).unwrap();
        assert_eq!(status.state, GenerateRequestState::Completed);
        assert!(status.generated_resources.is_empty());
    }

    #[test]
    fn unknown_request_is_dropped() {
        let h = Harness::new(policy(data_generation()));
        assert!(h.controller.reconcile(&"gr-missing".to_string()).is_ok());
        assert_eq!(h.requests.status_writes(), 0);
    }

    #[test]
    fn policy_that_no_longer_applies_fails_request() {
        let mut p = policy(data_generation());
        p.rules[0].resource_description.kinds = vec!["Pod".to_string()];
        let h = Harness::new(p);
        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        let name = h.submit();

        h.controller.reconcile(&name).unwrap();
        let status = h.requests.status(&name).unwrap();
        assert_eq!(status.state, GenerateRequestState::Failed);
        assert!(status.message.contains("does not apply"), "{}", status.message);
    }

    // ── 7. worker pool ────────────────────────────────────────────────────────

    #[test]
    fn worker_pool_drives_requests_to_completion() {
        let h = Harness::new(policy(data_generation()));
        h.store.insert(namespace("2024-07-01T00:00:00Z"));
        let config = ControllerConfig::default();
        let queue: Arc<RateLimitingQueue<String>> = Arc::new(RateLimitingQueue::new(Box::new(ItemExponentialFailureRateLimiter::new(
            config.base_delay(),
            config.max_delay(),
        ))));
        let handle = WorkerPool::new("generate", queue.clone(), &config)
            .start(h.controller.clone())
            .unwrap();

        let name = h.submit();
        queue.add(name.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.state(&name) != GenerateRequestState::Completed {
            assert!(Instant::now() < deadline, "request was not processed");
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert_eq!(h.store.create_count(), 1);
    }
}
