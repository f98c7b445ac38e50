//! # keel-audit
//!
//! Append-only, in-memory sinks for policy violations and events.
//!
//! ## Overview
//!
//! The evaluation core hands violations and events to fire-and-forget
//! recorders (`ViolationRecorder`, `EventRecorder` from keel-core). This
//! crate provides the reference implementations: every entry is wrapped in an
//! `AuditRecord` carrying a sequence number and arrival time, and a sink can
//! be exported at any moment as an `AuditLog`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel_audit::InMemoryViolationRecorder;
//!
//! let violations = Arc::new(InMemoryViolationRecorder::new());
//! let controller = GenerateController::new(store, policies, requests, status, violations.clone(), events);
//! // ... run reconciliations ...
//! for record in violations.export_log().records {
//!     println!("{} {}", record.sequence, record.payload.policy_name);
//! }
//! ```

pub mod memory;
pub mod record;

pub use memory::{InMemoryEventRecorder, InMemoryViolationRecorder};
pub use record::{AuditLog, AuditRecord};

// ── Tests ─────────────────────────────────────────────────────────────────────
