//! Unique identifiers for cycler entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a single pipeline cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Ulid);

impl CycleId {
    /// Generate a new CycleId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for CycleId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
