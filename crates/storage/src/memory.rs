//! In-memory state register.

use super::{trait_::check_version, Result, StateStore};
use async_trait::async_trait;
use cycler_core::SystemState;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Holds the current state behind a read/write lock.
///
/// Readers clone the `Arc` and release the lock immediately, so status
/// queries never hold up the writer beyond that point.
pub struct InMemoryStateStore {
    slot: RwLock<Arc<SystemState>>,
}

impl InMemoryStateStore {
    /// Create a store holding `seed`.
    pub fn new(seed: SystemState) -> Self {
        Self {
            slot: RwLock::new(Arc::new(seed)),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self) -> Result<Arc<SystemState>> {
        Ok(self.slot.read().await.clone())
    }

    async fn set(&self, state: SystemState) -> Result<Arc<SystemState>> {
        let mut slot = self.slot.write().await;
        check_version(&slot, &state)?;

        debug!("State {} -> {}", slot.version, state.version);
        let state = Arc::new(state);
        *slot = state.clone();
        Ok(state)
    }
}
