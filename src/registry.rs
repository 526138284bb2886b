//! Per-store coordination primitives: cancellation flags and store-scoped
//! locks.
//!
//! Both registries are plain injected services owned by the orchestrator,
//! not process-wide singletons. Entries are created lazily per store id and
//! removed when a run finalizes, so neither map grows across runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Cooperative cancellation flags, one per store with a run in flight.
///
/// Cancellation is observed only at phase boundaries: a phase that is
/// mid-flight when the flag is raised still runs to its own terminal
/// state, and only the next boundary check skips work.
#[derive(Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag for a store. Idempotent.
    pub fn request(&self, store_id: Uuid) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .entry(store_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self, store_id: Uuid) -> bool {
        let flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .get(&store_id)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Drop the flag entry once a run terminates.
    pub fn clear(&self, store_id: Uuid) {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags.remove(&store_id);
    }
}

/// Store-scoped mutual exclusion for read-modify-write of one store's
/// phase board and legacy status.
///
/// Locks are per store id, so concurrent onboarding of two different
/// stores never contends.
#[derive(Default)]
pub struct StoreLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl StoreLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, store_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(store_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Run `f` while holding the store's lock.
    pub async fn with_lock<F, Fut, T>(&self, store_id: Uuid, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(store_id);
        let _guard = lock.lock().await;
        f().await
    }

    /// Drop the lock entry once a run terminates. Holders that are still
    /// mid-critical-section keep the mutex alive through their own `Arc`.
    pub fn release(&self, store_id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&store_id);
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}
