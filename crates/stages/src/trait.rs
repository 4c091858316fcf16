//! Stage abstraction.

use async_trait::async_trait;
use cycler_core::SystemState;

/// A single named transform in the pipeline.
///
/// A stage sees only the state it is handed and communicates with later
/// stages only through the state it returns.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Get stage name.
    fn name(&self) -> &str;

    /// Get stage description.
    fn description(&self) -> &str {
        ""
    }

    /// Transform the state.
    async fn apply(&self, state: SystemState) -> Result<SystemState, StageError>;
}

/// Failure local to one stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage '{stage}' failed: {cause}")]
pub struct StageError {
    /// Stage that failed
    pub stage: String,
    /// What went wrong
    pub cause: String,
}

impl StageError {
    /// Create a new stage error.
    pub fn new(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
        }
    }
}
