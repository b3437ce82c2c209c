//! Work queue decoupling change notifications from reconciliation.
//!
//! Semantics follow the classic controller work queue:
//!
//! * an item added while it is already waiting is coalesced;
//! * an item added while a worker is processing it is held back until
//!   [`WorkQueue::done`] and delivered again afterwards, so one item is never
//!   processed by two workers at once;
//! * after [`WorkQueue::shut_down`] new adds are ignored, while [`WorkQueue::get`]
//!   keeps handing out what is left and returns `None` once the queue is empty.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::sync::Notify;

pub mod rate_limiter;
pub use rate_limiter::{default_controller_rate_limiter, RateLimiter};

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T: Clone + Eq + Hash> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Waits for the next item. `None` means the queue is shut down and empty.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks `item` as processed, releasing a re-add that arrived meanwhile.
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`WorkQueue`] with delayed, rate-limited re-adds and per-item retry
/// counting.
pub struct RateLimitingQueue<T> {
    queue: Arc<WorkQueue<T>>,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            limiter,
        }
    }

    pub fn with_default_rate_limiter() -> Self {
        Self::new(Box::new(default_controller_rate_limiter()))
    }

    pub fn add(&self, item: T) {
        self.queue.add(item);
    }

    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// Adds `item` once `delay` has passed. Must be called within a tokio runtime.
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(item);
            return;
        }
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Re-adds `item` after its backoff delay and counts a retry.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.limiter.when(&item);
        debug!("re-queueing item after {:?}", delay);
        self.add_after(item, delay);
    }

    /// Clears the retry count of `item`.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_of_a_waiting_item_are_coalesced() {
        let queue = WorkQueue::new();
        queue.add(1);
        queue.add(1);
        queue.add(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Some(1));
        assert_eq!(queue.get().await, Some(2));
    }

    #[tokio::test]
    async fn re_add_while_processing_waits_for_done() {
        let queue = WorkQueue::new();
        queue.add("a");
        let item = queue.get().await.unwrap();

        queue.add("a");
        assert!(queue.is_empty());

        queue.done(&item);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test]
    async fn get_blocks_until_an_item_arrives() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(7u32);
        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn shutdown_drains_then_stops() {
        let queue = WorkQueue::new();
        queue.add(1);
        queue.add(2);
        queue.shut_down();
        queue.add(3);

        assert_eq!(queue.get().await, Some(1));
        assert_eq!(queue.get().await, Some(2));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_wakes_idle_workers() {
        let queue = Arc::new(WorkQueue::<u32>::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        queue.shut_down();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_add_counts_retries() {
        let queue = RateLimitingQueue::with_default_rate_limiter();
        queue.add("req");
        let item = queue.get().await.unwrap();

        queue.add_rate_limited(item);
        queue.done(&item);
        assert!(queue.is_empty());
        assert_eq!(queue.num_requeues(&item), 1);

        assert_eq!(queue.get().await, Some("req"));
        queue.forget(&item);
        assert_eq!(queue.num_requeues(&item), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_adds_are_dropped_after_shutdown() {
        let queue = RateLimitingQueue::with_default_rate_limiter();
        queue.add_after(1u32, Duration::from_millis(50));
        queue.shut_down();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.get().await, None);
    }
}
