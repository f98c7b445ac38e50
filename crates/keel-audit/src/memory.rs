//! In-memory implementations of `ViolationRecorder` and `EventRecorder`.
//!
//! Both sinks are append-only: entries get a sequence number and a
//! timestamp on arrival and are never modified or removed. Recording is
//! fire-and-forget, so a poisoned lock is recovered rather than reported.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, info};

use keel_contracts::violation::{Event, ViolationInfo};
use keel_core::traits::{EventRecorder, ViolationRecorder};

use crate::record::{AuditLog, AuditRecord};

// ── Shared append-only state ──────────────────────────────────────────────────

struct AppendState<T> {
    records: Vec<AuditRecord<T>>,
    sequence: u64,
}

/// Sequence-numbered append-only storage shared by both sinks.
struct AppendLog<T> {
    state: Arc<Mutex<AppendState<T>>>,
}

impl<T: Clone> AppendLog<T> {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AppendState {
                records: Vec::new(),
                sequence: 0,
            })),
        }
    }

    fn append(&self, payload: T) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let sequence = state.sequence;
        state.records.push(AuditRecord {
            sequence,
            recorded_at: Utc::now(),
            payload,
        });
        state.sequence += 1;
        sequence
    }

    fn export(&self) -> AuditLog<T> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        AuditLog {
            records: state.records.clone(),
            exported_at: Utc::now(),
        }
    }

    fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).records.len()
    }
}

// ── Violations ────────────────────────────────────────────────────────────────

/// Keeps every recorded policy violation.
pub struct InMemoryViolationRecorder {
    log: AppendLog<ViolationInfo>,
}

impl Default for InMemoryViolationRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryViolationRecorder {
    pub fn new() -> Self {
        Self { log: AppendLog::new() }
    }

    pub fn export_log(&self) -> AuditLog<ViolationInfo> {
        self.log.export()
    }

    /// Violations recorded against `policy`, oldest first.
    pub fn for_policy(&self, policy: &str) -> Vec<ViolationInfo> {
        self.log
            .export()
            .payloads()
            .filter(|v| v.policy_name == policy)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationRecorder for InMemoryViolationRecorder {
    fn record(&self, info: ViolationInfo) {
        let policy = info.policy_name.clone();
        let resource = info.resource.to_string();
        let rules = info.rules.len();
        let sequence = self.log.append(info);
        info!(
            sequence,
            policy = %policy,
            resource = %resource,
            rules,
            "policy violation recorded"
        );
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Keeps every recorded event.
pub struct InMemoryEventRecorder {
    log: AppendLog<Event>,
}

impl Default for InMemoryEventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventRecorder {
    pub fn new() -> Self {
        Self { log: AppendLog::new() }
    }

    pub fn export_log(&self) -> AuditLog<Event> {
        self.log.export()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&self, event: Event) {
        debug!(target_resource = %event.target, reason = %event.reason, message = %event.message, "event recorded");
        self.log.append(event);
    }
}
