//! Per-pod mutual exclusion, so two requests for the same pod never race
//! on its status annotation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::types::NamespacedName;

type LockMap = HashMap<NamespacedName, Arc<tokio::sync::Mutex<()>>>;

#[derive(Default)]
pub(crate) struct PodLocks {
    locks: Mutex<LockMap>,
}

pub(crate) struct PodLockGuard<'a> {
    key: NamespacedName,
    owner: &'a PodLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PodLocks {
    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn lock(&self, key: &NamespacedName) -> PodLockGuard<'_> {
        let lock = Arc::clone(self.map().entry(key.clone()).or_default());
        let guard = lock.lock_owned().await;
        PodLockGuard {
            key: key.clone(),
            owner: self,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.map().len()
    }
}

impl Drop for PodLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.map();
        // Only the map's own reference left: nobody holds or waits for it.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
