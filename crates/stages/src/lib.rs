//! Stage Transforms
//!
//! The pluggable units a pipeline is composed of, plus the built-in set
//! and a registry that resolves configured stage names.

#![warn(missing_docs)]

pub mod r#trait;
pub mod builtin;
pub mod registry;

pub use r#trait::{Stage, StageError};
pub use builtin::{EncodeStage, TallyStage, MeasureStage, FnStage, DelayStage};
pub use registry::{StageRegistry, RegistryError};
