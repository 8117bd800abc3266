//! Work queue keyed by object identity
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already pending is a no-op; adding a key that is being processed marks it
//! dirty so it is queued again once the worker calls `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

struct QueueState<K> {
    queue: VecDeque<K>,
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processing: HashSet::new(),
            dirty: HashSet::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    fn push(&mut self, key: K) -> bool {
        if self.queued.contains(&key) {
            return false;
        }
        self.queued.insert(key.clone());
        self.queue.push_back(key);
        true
    }
}

/// Deduplicating work queue with per-key exponential backoff
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
{
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff_base,
            backoff_max,
        }
    }

    /// Queue `key` unless it is already pending
    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down {
            return;
        }
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.push(key) {
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has passed
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Queue `key` after its backoff delay, counting one more failure
    pub async fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let failures = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.backoff_delay(failures);
        debug!("Requeueing {:?} after {:?} ({} failures)", key, delay, failures);
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of `key`
    pub async fn forget(&self, key: &K) {
        self.state.lock().await.failures.remove(key);
    }

    /// Delay after `failures` consecutive failures: base doubled per failure, capped
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`, queueing it again if it was added meanwhile
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shutting_down && state.push(key.clone()) {
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub async fn shut_down(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of pending keys
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<WorkQueue<String>> {
        Arc::new(WorkQueue::new(
            Duration::from_millis(5),
            Duration::from_secs(1000),
        ))
    }

    #[tokio::test]
    async fn test_pending_keys_are_deduplicated() {
        let q = queue();
        q.add("a".to_string()).await;
        q.add("b".to_string()).await;
        q.add("a".to_string()).await;
        assert_eq!(q.len().await, 2);

        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert_eq!(q.get().await.as_deref(), Some("b"));
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_key_added_while_processing_is_requeued_on_done() {
        let q = queue();
        q.add("a".to_string()).await;
        let key = q.get().await.unwrap();

        q.add("a".to_string()).await;
        assert!(q.is_empty().await, "in-flight key must not be handed out twice");

        q.done(&key).await;
        assert_eq!(q.len().await, 1);
        assert_eq!(q.get().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let q = queue();
        q.add("a".to_string()).await;
        let key = q.get().await.unwrap();
        q.done(&key).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.add("late".to_string()).await;

        let key = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.shut_down().await;

        let key = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(key.is_none());

        q.add("ignored".to_string()).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_after_delays() {
        let q = queue();
        q.add_after("a".to_string(), Duration::from_millis(20));
        assert!(q.is_empty().await);

        let key = tokio::time::timeout(Duration::from_secs(5), q.get())
            .await
            .unwrap();
        assert_eq!(key.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let q = queue();
        assert_eq!(q.backoff_delay(1), Duration::from_millis(5));
        assert_eq!(q.backoff_delay(2), Duration::from_millis(10));
        assert_eq!(q.backoff_delay(4), Duration::from_millis(40));
        assert_eq!(q.backoff_delay(40), Duration::from_secs(1000));
    }

    #[tokio::test]
    async fn test_forget_resets_backoff() {
        let q = queue();
        assert_eq!(q.add_rate_limited("a".to_string()).await, Duration::from_millis(5));
        assert_eq!(q.add_rate_limited("a".to_string()).await, Duration::from_millis(10));
        q.forget(&"a".to_string()).await;
        assert_eq!(q.add_rate_limited("a".to_string()).await, Duration::from_millis(5));
    }
}
