//! Execution layer - pipeline composition and the cycle scheduler.

#![warn(missing_docs)]

pub mod error;
pub mod config;
pub mod pipeline;
mod dispatch;
pub mod scheduler;

pub use error::{CycleError, TimeoutError, PipelineError, SchedulerError};
pub use config::SchedulerConfig;
pub use pipeline::{Pipeline, PipelineOutput, StageDescriptor};
pub use scheduler::{Scheduler, LoopState, StatusReport};
