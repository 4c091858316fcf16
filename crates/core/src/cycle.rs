//! Cycle result - the record emitted for every pipeline pass.

use crate::id::CycleId;
use crate::Time;
use serde::{Deserialize, Serialize};

/// Outcome of one cycle, as handed to result sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleResult {
    /// Unique identifier
    pub cycle_id: CycleId,

    /// Version the cycle read from the store
    pub input_version: u64,

    /// Version the cycle published (equals `input_version` on failure)
    pub output_version: u64,

    /// Stages that completed successfully, in execution order
    pub stages_applied: Vec<String>,

    /// Stage that broke the chain, if any
    pub failed_stage: Option<String>,

    /// Wall time spent in the cycle
    pub duration_ms: u64,

    /// When the cycle began
    pub started_at: Time,

    /// Success or failure
    pub outcome: CycleOutcome,
}

impl CycleResult {
    /// Whether the cycle published a new state.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Success)
    }
}

/// Success or failure of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CycleOutcome {
    /// New state was published
    Success,
    /// State was retained unchanged
    Failure {
        /// Why the cycle failed
        reason: FailureReason,
    },
}

/// Why a cycle failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureReason {
    /// A stage returned an error
    Stage {
        /// Stage name
        stage: String,
        /// Error text reported by the stage
        cause: String,
    },
    /// The cycle ran past its time bound
    Timeout {
        /// Configured bound
        timeout_ms: u64,
    },
    /// The store refused the write because a newer version exists
    StaleVersion {
        /// Version the cycle tried to write
        attempted: u64,
        /// Version held by the store
        current: u64,
    },
    /// The state is already at the highest representable version
    VersionExhausted {
        /// Version that cannot be advanced
        version: u64,
    },
    /// Any other store failure
    Store {
        /// Error text
        message: String,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Stage { stage, cause } => write!(f, "stage '{}' failed: {}", stage, cause),
            FailureReason::Timeout { timeout_ms } => write!(f, "cycle exceeded {}ms", timeout_ms),
            FailureReason::StaleVersion { attempted, current } => {
                write!(f, "stale write: version {} <= current {}", attempted, current)
            }
            FailureReason::VersionExhausted { version } => {
                write!(f, "version {} cannot be advanced", version)
            }
            FailureReason::Store { message } => write!(f, "store error: {}", message),
        }
    }
}
