//! cycler core data models.
//!
//! This crate defines the values that flow through the cycling pipeline:
//! the versioned system state and the per-cycle result record.

#![warn(missing_docs)]

// Core identities
mod id;

// State and cycle records
mod state;
mod cycle;

// Re-exports
pub use id::*;
pub use state::SystemState;
pub use cycle::{CycleResult, CycleOutcome, FailureReason};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
