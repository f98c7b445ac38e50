//! Fixed-size worker pool draining a `RateLimitingQueue`.
//!
//! Each worker loops:
//!
//!   get → reconcile → handle result → done
//!
//! A failed key is re-queued with backoff while it has been re-queued fewer
//! than `retry_limit` times. Past the ceiling the key is forgotten and the
//! failure logged; nothing is escalated. The stop signal is
//! `WorkerHandle::shutdown`, observed between keys, never mid-reconcile.

use std::{
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info, warn};

use keel_contracts::error::{KeelError, KeelResult};

use crate::{config::ControllerConfig, queue::RateLimitingQueue};

/// Processes one key. Implementations must be safe to call from several
/// workers at once; the queue guarantees the same key is never processed
/// concurrently.
pub trait Reconciler<K>: Send + Sync {
    fn reconcile(&self, key: &K) -> KeelResult<()>;
}

/// Configuration for a pool of workers sharing one queue.
pub struct WorkerPool<K> {
    name: String,
    queue: Arc<RateLimitingQueue<K>>,
    workers: usize,
    retry_limit: u32,
}

impl<K> WorkerPool<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, queue: Arc<RateLimitingQueue<K>>, config: &ControllerConfig) -> Self {
        Self {
            name: name.into(),
            queue,
            workers: config.workers,
            retry_limit: config.retry_limit,
        }
    }

    /// Spawn the worker threads.
    ///
    /// Returns `KeelError::Config` if a thread cannot be spawned; workers
    /// already started are shut down first.
    pub fn start(self, reconciler: Arc<dyn Reconciler<K>>) -> KeelResult<WorkerHandle<K>> {
        let mut threads = Vec::with_capacity(self.workers);

        for index in 0..self.workers {
            let queue = self.queue.clone();
            let reconciler = reconciler.clone();
            let name = self.name.clone();
            let retry_limit = self.retry_limit;

            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{}", self.name, index))
                .spawn(move || {
                    while process_next_work_item(&name, &queue, reconciler.as_ref(), retry_limit) {}
                    debug!(controller = %name, worker = index, "worker exiting");
                });

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    WorkerHandle { queue: self.queue.clone(), threads }.shutdown();
                    return Err(KeelError::Config {
                        reason: format!("failed to spawn worker for '{}': {}", self.name, e),
                    });
                }
            }
        }

        info!(controller = %self.name, workers = self.workers, "started workers");
        Ok(WorkerHandle {
            queue: self.queue,
            threads,
        })
    }
}

/// Running workers. Dropping the handle leaves them running; call
/// `shutdown` to stop them.
pub struct WorkerHandle<K> {
    queue: Arc<RateLimitingQueue<K>>,
    threads: Vec<JoinHandle<()>>,
}

impl<K: Eq + Hash + Clone + Send> WorkerHandle<K> {
    /// Shut the queue down and wait for every worker to finish its current key.
    pub fn shutdown(self) {
        self.queue.shut_down();
        for handle in self.threads {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

/// Pull one key and reconcile it. Returns false once the queue has shut down.
pub fn process_next_work_item<K>(
    controller: &str,
    queue: &RateLimitingQueue<K>,
    reconciler: &dyn Reconciler<K>,
    retry_limit: u32,
) -> bool
where
    K: Eq + Hash + Clone + Debug + Send,
{
    let Some(key) = queue.get() else {
        return false;
    };

    let result = reconciler.reconcile(&key);
    handle_err(controller, queue, result, &key, retry_limit);
    queue.done(&key);
    true
}

fn handle_err<K>(controller: &str, queue: &RateLimitingQueue<K>, result: KeelResult<()>, key: &K, retry_limit: u32)
where
    K: Eq + Hash + Clone + Debug + Send,
{
    let Err(err) = result else {
        queue.forget(key);
        return;
    };

    if queue.num_requeues(key) < retry_limit {
        warn!(controller = %controller, key = ?key, error = %err, "error syncing key, requeuing");
        queue.add_rate_limited(key.clone());
        return;
    }

    queue.forget(key);
    warn!(controller = %controller, key = ?key, error = %err, "dropping key out of the queue");
}
