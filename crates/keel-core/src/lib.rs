//! # keel-core
//!
//! Runtime plumbing for the keel policy engine.
//!
//! This crate provides:
//! - The collaborator traits (`ResourceStore`, `PolicyLister`,
//!   `GenerateRequestLister`, `StatusControl`, `ViolationRecorder`,
//!   `EventRecorder`) that keep the evaluation core free of I/O
//! - `RateLimitingQueue`, a generic deduplicating delay queue with per-key
//!   exponential backoff
//! - `WorkerPool`, which drains the queue with a fixed set of threads and
//!   enforces the retry ceiling
//! - `ControllerConfig` and in-memory store implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel_core::{ControllerConfig, ItemExponentialFailureRateLimiter, RateLimitingQueue, WorkerPool};
//!
//! let config = ControllerConfig::default();
//! let queue = Arc::new(RateLimitingQueue::new(Box::new(
//!     ItemExponentialFailureRateLimiter::new(config.base_delay(), config.max_delay()),
//! )));
//! let handle = WorkerPool::new("generate", queue.clone(), &config).start(reconciler)?;
//! queue.add("gr-1".to_string());
//! handle.shutdown();
//! ```

pub mod config;
pub mod memory;
pub mod queue;
pub mod traits;
pub mod worker;

pub use config::ControllerConfig;
pub use memory::{InMemoryPolicyStore, InMemoryResourceStore};
pub use queue::{ItemExponentialFailureRateLimiter, RateLimiter, RateLimitingQueue};
pub use worker::{Reconciler, WorkerHandle, WorkerPool};
