//! State store trait abstraction.

use async_trait::async_trait;
use cycler_core::SystemState;
use std::sync::Arc;

/// Error type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A write carried a version that is not newer than the stored one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stale version: attempted {attempted}, current {current}")]
pub struct StaleVersionError {
    /// Version of the rejected state
    pub attempted: u64,
    /// Version held by the store
    pub current: u64,
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Monotonicity guard rejected the write
    #[error(transparent)]
    StaleVersion(#[from] StaleVersionError),

    /// Stored state no longer matches what the store handed out.
    /// Unrecoverable.
    #[error("state corrupted: {0}")]
    Corrupted(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the store can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupted(_))
    }
}

/// Single-writer, multi-reader register holding the current state.
///
/// Implementations must never expose a half-written value: `get` returns a
/// point snapshot and `set` swaps the whole state in one step.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Snapshot of the current state.
    async fn get(&self) -> Result<Arc<SystemState>>;

    /// Replace the current state.
    ///
    /// Fails with [`StoreError::StaleVersion`] when `state.version` is not
    /// strictly greater than the stored version; the store is left unchanged.
    async fn set(&self, state: SystemState) -> Result<Arc<SystemState>>;
}

/// Shared guard used by every implementation.
pub(crate) fn check_version(current: &SystemState, next: &SystemState) -> std::result::Result<(), StaleVersionError> {
    if next.version <= current.version {
        return Err(StaleVersionError {
            attempted: next.version,
            current: current.version,
        });
    }
    Ok(())
}
