use std::{
    collections::{HashMap, HashSet, VecDeque},
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{
    spawn,
    sync::Notify,
    time::{sleep_until, Instant},
};

/// A deduplicating, delayable work queue of object keys.
///
/// A key is handed to at most one worker at a time: a key added while it is
/// being processed is kept dirty and redelivered once [`WorkQueue::done`] is
/// called for it.
#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: HashMap<K, Instant>,
    requeues: HashMap<K, u32>,
    is_shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::default(),
            dirty: HashSet::default(),
            processing: HashSet::default(),
            waiting: HashMap::default(),
            requeues: HashMap::default(),
            is_shutting_down: false,
        }
    }
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            notify: Notify::new(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: 'static + Clone + Eq + Hash + Send + Sync,
{
    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // the bookkeeping is always left consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.is_shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            // redelivered by `done`
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Schedules `key` to be added once `delay` has passed.
    ///
    /// Only the earliest pending deadline of a key is kept.
    /// Must be called within a tokio runtime.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.is_shutting_down {
                return;
            }
            match state.waiting.get(&key) {
                Some(pending) if *pending <= deadline => return,
                _ => {
                    state.waiting.insert(key.clone(), deadline);
                }
            }
        }

        let queue = Arc::downgrade(self);
        spawn(async move {
            sleep_until(deadline).await;
            Self::fire(queue, key, deadline)
        });
    }

    fn fire(queue: Weak<Self>, key: K, deadline: Instant) {
        let Some(queue) = queue.upgrade() else {
            return;
        };

        {
            let mut state = queue.lock();
            match state.waiting.get(&key) {
                // superseded by an earlier deadline
                Some(pending) if *pending == deadline => {
                    state.waiting.remove(&key);
                }
                _ => return,
            }
        }
        queue.add(key)
    }

    /// Schedules a retry of a failed key, tracking how often it has failed.
    pub fn add_rate_limited(self: &Arc<Self>, key: K, delay: Duration) {
        {
            let mut state = self.lock();
            let requeues = state.requeues.entry(key.clone()).or_default();
            *requeues = requeues.saturating_add(1);
        }
        self.add_after(key, delay)
    }

    /// Clears the retry state of the key.
    pub fn forget(&self, key: &K) {
        self.lock().requeues.remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.lock().requeues.get(key).copied().unwrap_or_default()
    }

    /// Waits for the next key, marking it as being processed.
    ///
    /// Returns `None` once the queue is shutting down.
    pub async fn get(&self) -> Option<K> {
        loop {
            // register before checking the state so that a concurrent `add` is never missed
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.is_shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.is_shutting_down = true;
            state.waiting.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().is_shutting_down
    }

    /// Returns the number of keys ready to be processed.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
