use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::ServiceError;

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Cache of live sessions keyed by id.
///
/// The map lock only guards slot lookup; each slot has its own mutex that serializes every
/// mutation of that session. An empty slot means "not loaded" and is filled from the store.
/// A guard releasing an empty slot nobody else waits on removes it, so lookups of unknown
/// ids leave nothing behind.
pub struct SessionRegistry<T> {
    slots: Arc<DashMap<Uuid, Slot<T>>>,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Clone> SessionRegistry<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the slot of `id`, creating it when absent.
    pub async fn lock(&self, id: Uuid) -> SessionGuard<T> {
        let slot = self.slots.entry(id).or_default().clone();
        SessionGuard {
            guard: slot.lock_owned().await,
            slots: Arc::clone(&self.slots),
            id,
        }
    }

    /// Forget a session, typically once it reached a terminal state.
    pub fn evict(&self, id: Uuid) {
        self.slots.remove(&id);
    }

    /// Number of slots, loaded or being loaded.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot exists.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Exclusive access to one cached session.
pub struct SessionGuard<T> {
    guard: OwnedMutexGuard<Option<T>>,
    slots: Arc<DashMap<Uuid, Slot<T>>>,
    id: Uuid,
}

impl<T: Clone> SessionGuard<T> {
    /// Cached copy of the session, loading it with `fetch` on a miss.
    pub async fn load<F, Fut>(&mut self, fetch: F) -> Result<Option<T>, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, ServiceError>>,
    {
        if self.guard.is_none() {
            *self.guard = fetch().await?;
        }
        Ok(self.guard.clone())
    }

    /// Record the value that was just persisted.
    pub fn store(&mut self, value: T) {
        *self.guard = Some(value);
    }

    /// Drop the cached copy so the next access reloads from the store.
    pub fn invalidate(&mut self) {
        *self.guard = None;
    }
}

impl<T> Drop for SessionGuard<T> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }
        // The map and this guard hold the only references: no task is queued on the slot.
        self.slots
            .remove_if(&self.id, |_, slot| Arc::strong_count(slot) == 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_loads_once_then_serves_cache() {
        let registry = SessionRegistry::<u32>::new();
        let id = Uuid::new_v4();

        let mut guard = registry.lock(id).await;
        let first = guard.load(|| async { Ok(Some(7)) }).await.unwrap();
        assert_eq!(first, Some(7));
        let cached = guard
            .load(|| async { Err(ServiceError::Internal("must not reload".into())) })
            .await
            .unwrap();
        assert_eq!(cached, Some(7));
    }

    #[tokio::test]
    async fn invalidated_slot_reloads() {
        let registry = SessionRegistry::<u32>::new();
        let id = Uuid::new_v4();

        {
            let mut guard = registry.lock(id).await;
            guard.store(1);
            guard.invalidate();
        }

        let mut guard = registry.lock(id).await;
        let value = guard.load(|| async { Ok(Some(2)) }).await.unwrap();
        assert_eq!(value, Some(2));
    }

    #[tokio::test]
    async fn slot_lock_serializes_access() {
        let registry = Arc::new(SessionRegistry::<u32>::new());
        let id = Uuid::new_v4();

        let guard = registry.lock(id).await;
        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut guard = registry.lock(id).await;
                guard.store(2);
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_leave_no_slot() {
        let registry = SessionRegistry::<u32>::new();

        for _ in 0..10 {
            let mut guard = registry.lock(Uuid::new_v4()).await;
            assert_eq!(guard.load(|| async { Ok(None) }).await.unwrap(), None);
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn empty_slot_survives_while_contended() {
        let registry = Arc::new(SessionRegistry::<u32>::new());
        let id = Uuid::new_v4();

        let guard = registry.lock(id).await;
        let contender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut guard = registry.lock(id).await;
                guard.store(5);
            })
        };
        tokio::task::yield_now().await;
        drop(guard);
        assert_eq!(registry.len(), 1);

        contender.await.unwrap();
        let mut guard = registry.lock(id).await;
        let value = guard
            .load(|| async { Err(ServiceError::Internal("must be cached".into())) })
            .await
            .unwrap();
        assert_eq!(value, Some(5));
    }
}
