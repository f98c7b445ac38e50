//! Record and log types for the in-memory sinks.
//!
//! `AuditRecord` wraps whatever was recorded (a `ViolationInfo` or an
//! `Event`) with its position in the sink and the time it arrived.
//! `AuditLog` is a point-in-time export of a whole sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord<T> {
    /// Position in the sink, starting at 0. Never reused.
    pub sequence: u64,

    /// Wall-clock time (UTC) the entry was recorded.
    pub recorded_at: DateTime<Utc>,

    pub payload: T,
}

/// A snapshot of every entry recorded so far, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog<T> {
    pub records: Vec<AuditRecord<T>>,

    /// Wall-clock time (UTC) the snapshot was taken.
    pub exported_at: DateTime<Utc>,
}

impl<T> AuditLog<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Payloads without their envelopes.
    pub fn payloads(&self) -> impl Iterator<Item = &T> {
        self.records.iter().map(|r| &r.payload)
    }
}
