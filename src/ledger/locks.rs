use crate::core::Owner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-owner async mutexes guarding read-modify-write cycles on a ledger.
///
/// Different owners never block each other; the same owner is strictly
/// serialized across manual operations and scheduler rollovers.
#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<Owner, Arc<AsyncMutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, owner: &Owner) -> OwnerGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(owner.clone()).or_default())
        };
        OwnerGuard {
            guard: Some(lock.lock_owned().await),
            owner: owner.clone(),
            locks: self,
        }
    }

    pub fn tracked_owners(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops the owner's entry once nobody holds or waits on it.
    fn release(&self, owner: &Owner) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(owner).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(owner);
        }
    }
}

/// Holds one owner's lock; releasing it forgets the owner when idle.
#[derive(Debug)]
pub struct OwnerGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    owner: Owner,
    locks: &'a OwnerLocks,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so the map holds the only remaining reference
        drop(self.guard.take());
        self.locks.release(&self.owner);
    }
}
