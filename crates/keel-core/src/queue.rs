//! A deduplicating, rate-limited delay queue.
//!
//! Semantics:
//!
//! - A key that is already pending is not queued twice.
//! - A key handed out by `get()` is "processing" until `done()`. Adding it
//!   again meanwhile only marks it dirty; `done()` re-queues it. A key is
//!   therefore never in flight on two workers at once.
//! - `add_after` parks a key until its delay elapses; `add_rate_limited`
//!   asks the `RateLimiter` for that delay.
//! - After `shut_down()`, `get()` drains what is already queued and then
//!   returns `None`. Parked keys are abandoned.
//!
//! The queue knows nothing about policies. Keys are any `Clone + Eq + Hash`.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// Decides how long a failing key waits before its next attempt.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay before the next attempt. Counts as one requeue of `item`.
    fn when(&self, item: &K) -> Duration;

    /// Clear the failure history of `item`.
    fn forget(&self, item: &K);

    /// How many times `when` has been called for `item` since it was last forgotten.
    fn num_requeues(&self, item: &K) -> u32;
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
pub struct ItemExponentialFailureRateLimiter<K> {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialFailureRateLimiter<K> {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + Send> RateLimiter<K> for ItemExponentialFailureRateLimiter<K> {
    fn when(&self, item: &K) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(item.clone()).or_insert(0);
        let exponent = *count;
        *count = count.saturating_add(1);

        // 2^exponent overflows quickly; anything past 2^31 is past any sane cap.
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn forget(&self, item: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(item);
    }

    fn num_requeues(&self, item: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item)
            .copied()
            .unwrap_or(0)
    }
}

// ── Internal state ────────────────────────────────────────────────────────────

/// A key parked until `ready_at`. Ordered by time, then insertion order.
struct Delayed<K> {
    ready_at: Instant,
    seq: u64,
    item: K,
}

impl<K> PartialEq for Delayed<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Delayed<K> {}

impl<K> PartialOrd for Delayed<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Delayed<K> {
    // Reversed so `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    delayed: BinaryHeap<Delayed<K>>,
    next_seq: u64,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> QueueState<K> {
    fn insert(&mut self, item: K) {
        if !self.dirty.insert(item.clone()) {
            return;
        }
        if self.processing.contains(&item) {
            return;
        }
        self.queue.push_back(item);
    }

    fn promote_ready(&mut self, now: Instant) {
        while self.delayed.peek().is_some_and(|d| d.ready_at <= now) {
            if let Some(entry) = self.delayed.pop() {
                self.insert(entry.item);
            }
        }
    }
}

// ── Public queue ──────────────────────────────────────────────────────────────

pub struct RateLimitingQueue<K> {
    state: Mutex<QueueState<K>>,
    ready: Condvar,
    limiter: Box<dyn RateLimiter<K>>,
}

impl<K: Eq + Hash + Clone + Send> RateLimitingQueue<K> {
    pub fn new(limiter: Box<dyn RateLimiter<K>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: BinaryHeap::new(),
                next_seq: 0,
                shutting_down: false,
            }),
            ready: Condvar::new(),
            limiter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `item` for processing unless it is already pending.
    pub fn add(&self, item: K) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        state.insert(item);
        self.ready.notify_one();
    }

    /// Queue `item` once `delay` has elapsed.
    pub fn add_after(&self, item: K, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.delayed.push(Delayed {
            ready_at: Instant::now() + delay,
            seq,
            item,
        });
        // Wake a sleeper so it recomputes its deadline.
        self.ready.notify_one();
    }

    /// Queue `item` after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, item: K) {
        let delay = self.limiter.when(&item);
        self.add_after(item, delay);
    }

    /// Block until a key is available. Returns `None` once the queue is
    /// shutting down and nothing is left to hand out.
    pub fn get(&self) -> Option<K> {
        let mut state = self.lock();
        loop {
            state.promote_ready(Instant::now());

            if let Some(item) = state.queue.pop_front() {
                state.dirty.remove(&item);
                state.processing.insert(item.clone());
                return Some(item);
            }

            if state.shutting_down {
                return None;
            }

            let next_deadline = state.delayed.peek().map(|d| d.ready_at);
            state = match next_deadline {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    self.ready
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Mark `item` as finished. If it was added again while processing, it
    /// goes back on the queue now.
    pub fn done(&self, item: &K) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.ready.notify_one();
        }
    }

    /// Clear the retry history of `item`.
    pub fn forget(&self, item: &K) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &K) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// Keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys parked behind a delay.
    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }

    /// Stop accepting keys and wake every blocked `get()`.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        state.shutting_down = true;
        self.ready.notify_all();
    }
}
