use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Notify;
use tracing::debug;

const BASE_DELAY_MS: u64 = 5;
const MAX_DELAY_MS: u64 = 1_000_000;

/// A rate-limited work queue.
///
/// Items are deduplicated: an item added while queued is dropped, and an item
/// added while being processed is only re-queued once `done` is called for
/// it. Together with a single worker per queue this guarantees that syncs for
/// one key never overlap and always observe the latest enqueue.
///
/// `add_rate_limited` re-queues a failed item after a per-item exponential
/// backoff; `forget` clears the item's failure count after a successful sync.
pub struct RateLimitingQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    name: &'static str,
    state: Mutex<State<T>>,
    notify: Notify,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

impl<T> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// === impl RateLimitingQueue ===

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn named(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if !state.processing.contains(&item) {
            state.queue.push_back(item);
            self.inner.notify.notify_one();
        }
    }

    /// Waits for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Marks processing of `item` complete. If the item was re-added while it
    /// was being processed, it goes straight back on the queue.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            self.inner.notify.notify_one();
        }
    }

    /// Clears the failure history for `item`.
    pub fn forget(&self, item: &T) {
        self.inner.state.lock().failures.remove(item);
    }

    /// Re-queues `item` after its exponential backoff delay.
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let exp = (*failures).min(20);
            *failures += 1;
            Duration::from_millis((BASE_DELAY_MS << exp).min(MAX_DELAY_MS))
        };
        debug!(queue = self.inner.name, ?delay, "Re-queueing after failure");
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Shuts the queue down: pending items are discarded and `get` returns
    /// `None`. Idempotent.
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            state.queue.clear();
        }
        self.inner.notify.notify_one();
        self.inner.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
