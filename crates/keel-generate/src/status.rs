//! GenerateRequest status handling.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        PoisonError, RwLock,
    },
};

use tracing::debug;

use keel_contracts::{
    error::{KeelError, KeelResult},
    generate::{GenerateRequest, GenerateRequestState, GenerateRequestStatus},
    resource::ResourceSpec,
};
use keel_core::traits::{GenerateRequestLister, StatusControl};

/// Write the terminal status for a finished pass: `Failed` with the error
/// message when `error` is set, `Completed` otherwise. Either way the
/// resources generated so far are recorded.
pub fn update_status(
    status: &dyn StatusControl,
    request: &GenerateRequest,
    error: Option<&KeelError>,
    generated: &[ResourceSpec],
) -> KeelResult<()> {
    match error {
        Some(e) => status.failed(request, &e.to_string(), generated),
        None => status.success(request, generated),
    }
}

/// GenerateRequests held in memory, keyed by name.
///
/// Serves reads through `GenerateRequestLister` and terminal writes through
/// `StatusControl`. Counts status writes so tests can assert there was exactly
/// one per pass, or none.
#[derive(Default)]
pub struct InMemoryGenerateRequestStore {
    requests: RwLock<BTreeMap<String, GenerateRequest>>,
    status_writes: AtomicU64,
}

impl InMemoryGenerateRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a request.
    pub fn insert(&self, request: GenerateRequest) {
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request.name.clone(), request);
    }

    pub fn status(&self, name: &str) -> Option<GenerateRequestStatus> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|r| r.status.clone())
    }

    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn write_status(
        &self,
        request: &GenerateRequest,
        state: GenerateRequestState,
        message: &str,
        generated: &[ResourceSpec],
    ) -> KeelResult<()> {
        let mut requests = self.requests.write().unwrap_or_else(PoisonError::into_inner);
        let stored = requests
            .get_mut(&request.name)
            .ok_or_else(|| KeelError::not_found("GenerateRequest", "", &request.name))?;

        stored.status = GenerateRequestStatus {
            state,
            message: message.to_string(),
            generated_resources: generated.iter().filter(|s| !s.is_empty()).cloned().collect(),
        };
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        debug!(request = %request.name, state = %state, "status updated");
        Ok(())
    }
}

impl GenerateRequestLister for InMemoryGenerateRequestStore {
    fn get(&self, name: &str) -> KeelResult<GenerateRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| KeelError::not_found("GenerateRequest", "", name))
    }
}

impl StatusControl for InMemoryGenerateRequestStore {
    fn success(&self, request: &GenerateRequest, generated: &[ResourceSpec]) -> KeelResult<()> {
        self.write_status(request, GenerateRequestState::Completed, "", generated)
    }

    fn failed(&self, request: &GenerateRequest, message: &str, generated: &[ResourceSpec]) -> KeelResult<()> {
        self.write_status(request, GenerateRequestState::Failed, message, generated)
    }
}
