use std::sync::Arc;

use tokio::sync::RwLock;

use crate::dao::session_store::SessionStore;

/// Shared handle to the installed session store.
///
/// The slot is empty while the application runs in degraded mode; gateways and services
/// hold a clone and resolve the backend on every call.
#[derive(Clone, Default)]
pub struct StoreSlot {
    inner: Arc<RwLock<Option<Arc<dyn SessionStore>>>>,
}

impl StoreSlot {
    /// Slot pre-filled with `store`.
    pub fn with_store(store: Arc<dyn SessionStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(store))),
        }
    }

    /// Current backend, if one is installed.
    pub async fn get(&self) -> Option<Arc<dyn SessionStore>> {
        self.inner.read().await.as_ref().cloned()
    }

    /// Replace the backend; returns whether the slot was empty before.
    pub async fn install(&self, store: Arc<dyn SessionStore>) -> bool {
        let mut guard = self.inner.write().await;
        guard.replace(store).is_none()
    }

    /// Drop the backend; returns whether one was installed.
    pub async fn clear(&self) -> bool {
        let mut guard = self.inner.write().await;
        guard.take().is_some()
    }
}
