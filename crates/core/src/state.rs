//! System state - the versioned value carried from cycle to cycle.

use crate::Time;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The state the pipeline transforms.
///
/// A published state is never mutated: each successful cycle produces a new
/// value through [`SystemState::successor`] and the old one is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Monotonic version, bumped once per successful cycle
    pub version: u64,

    /// Opaque payload owned by the stages
    pub payload: Value,

    /// When this version was produced
    pub timestamp: Time,
}

impl SystemState {
    /// Create a state at an explicit version.
    pub fn new(version: u64, payload: impl Into<Value>) -> Self {
        Self {
            version,
            payload: payload.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create the seed state (version 0).
    pub fn seed(payload: impl Into<Value>) -> Self {
        Self::new(0, payload)
    }

    /// Build the next generation carrying `payload`.
    ///
    /// Returns `None` once the version has reached `u64::MAX`.
    pub fn successor(&self, payload: Value) -> Option<Self> {
        Some(Self {
            version: self.version.checked_add(1)?,
            payload,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Replace the payload, keeping version and timestamp.
    ///
    /// The built-in stages use this to hand a transformed payload down the
    /// chain.
    pub fn with_payload(self, payload: Value) -> Self {
        Self { payload, ..self }
    }
}
