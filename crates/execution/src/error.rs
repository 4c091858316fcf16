//! Error taxonomy for pipeline runs and the scheduler.

use crate::scheduler::LoopState;
use cycler_core::FailureReason;
use cycler_stages::StageError;
use cycler_storage::StoreError;

/// The cycle ran past its configured bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cycle exceeded {timeout_ms}ms")]
pub struct TimeoutError {
    /// Configured bound
    pub timeout_ms: u64,
}

/// Why a single cycle failed.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// A stage failed; later stages were not run
    #[error("{source}")]
    Stage {
        /// The failing stage's error
        source: StageError,
        /// Stages that completed before the failure
        stages_applied: Vec<String>,
    },

    /// The cycle timed out
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// Reading or publishing state failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The input is at `u64::MAX` and has no successor
    #[error("version {version} cannot be advanced")]
    VersionExhausted {
        /// Version of the input state
        version: u64,
        /// Stages that completed before the bump was refused
        stages_applied: Vec<String>,
    },
}

impl CycleError {
    /// Stages that completed before the failure.
    pub fn stages_applied(&self) -> &[String] {
        match self {
            CycleError::Stage { stages_applied, .. } => stages_applied,
            CycleError::VersionExhausted { stages_applied, .. } => stages_applied,
            _ => &[],
        }
    }

    /// Name of the stage that broke the chain.
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            CycleError::Stage { source, .. } => Some(&source.stage),
            _ => None,
        }
    }

    /// Whether the loop must stop.
    ///
    /// A corrupted store and an exhausted version both fail every later
    /// cycle the same way.
    pub fn is_fatal(&self) -> bool {
        match self {
            CycleError::Store(e) => e.is_fatal(),
            CycleError::VersionExhausted { .. } => true,
            _ => false,
        }
    }

    /// Map to the serializable reason carried by a cycle result.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            CycleError::Stage { source, .. } => FailureReason::Stage {
                stage: source.stage.clone(),
                cause: source.cause.clone(),
            },
            CycleError::Timeout(t) => FailureReason::Timeout { timeout_ms: t.timeout_ms },
            CycleError::Store(StoreError::StaleVersion(e)) => FailureReason::StaleVersion {
                attempted: e.attempted,
                current: e.current,
            },
            CycleError::Store(e) => FailureReason::Store { message: e.to_string() },
            CycleError::VersionExhausted { version, .. } => FailureReason::VersionExhausted { version: *version },
        }
    }
}

/// Errors building a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// No stages were given
    #[error("pipeline needs at least one stage")]
    Empty,

    /// The same name appears twice
    #[error("stage '{0}' appears more than once")]
    DuplicateStage(String),
}

/// Errors from the scheduler's control surface.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The requested action is not allowed in the current state
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        /// State the scheduler was in
        from: LoopState,
        /// Attempted action
        action: &'static str,
    },

    /// Configuration rejected
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The loop cannot make further progress
    #[error("fatal cycle error: {0}")]
    Fatal(#[source] CycleError),
}
