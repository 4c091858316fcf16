//! Pipeline - chains stages in a fixed order.

use crate::error::{CycleError, PipelineError};
use cycler_core::SystemState;
use cycler_stages::{Stage, StageError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::debug;

/// A named stage in the pipeline.
#[derive(Clone)]
pub struct StageDescriptor {
    /// Name used in traces and errors
    pub name: String,
    /// The transform itself
    pub transform: Arc<dyn Stage>,
}

impl StageDescriptor {
    /// Describe a stage under its own name.
    pub fn new(transform: Arc<dyn Stage>) -> Self {
        Self {
            name: transform.name().to_string(),
            transform,
        }
    }

    /// Describe a stage under an explicit name.
    pub fn named(name: impl Into<String>, transform: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            transform,
        }
    }
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor").field("name", &self.name).finish()
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The next generation (input version + 1)
    pub state: SystemState,
    /// Every stage, in the order applied
    pub stages_applied: Vec<String>,
}

/// Ordered chain of stages, fixed at construction.
///
/// ```text
/// encode → optimize → evolve → enhance → measure
/// ```
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<StageDescriptor>,
    pipeline_id: String,
}

impl Pipeline {
    /// Build a pipeline. Rejects an empty list and repeated names.
    pub fn new(stages: Vec<StageDescriptor>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::DuplicateStage(stage.name.clone()));
            }
        }

        let pipeline_id = stages
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("→");

        Ok(Self { stages, pipeline_id })
    }

    /// Build a pipeline naming each descriptor after its stage.
    pub fn from_stages(stages: Vec<Arc<dyn Stage>>) -> Result<Self, PipelineError> {
        Self::new(stages.into_iter().map(StageDescriptor::new).collect())
    }

    /// Stage names in declared order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Arrow-joined stage names, e.g. `optimize→evolve→measure`.
    pub fn id(&self) -> &str {
        &self.pipeline_id
    }

    /// Run every stage over `input` in order.
    ///
    /// Stops at the first failing stage; whatever the earlier stages
    /// produced is dropped. On success the returned state is a successor
    /// of `input`, whatever version the stages left on it.
    pub async fn run(&self, input: &SystemState) -> Result<PipelineOutput, CycleError> {
        let mut stages_applied = Vec::with_capacity(self.stages.len());
        let state = self.run_tracked(input, &mut stages_applied).await?;
        Ok(PipelineOutput { state, stages_applied })
    }

    /// Like [`Pipeline::run`], recording each completed stage into
    /// `applied` as it finishes.
    ///
    /// If the future is dropped part way (e.g. on timeout), `applied` still
    /// holds the completed prefix.
    pub async fn run_tracked(
        &self,
        input: &SystemState,
        applied: &mut Vec<String>,
    ) -> Result<SystemState, CycleError> {
        let mut current = input.clone();

        for stage in &self.stages {
            let start = Instant::now();

            current = match apply_isolated(stage, current).await {
                Ok(next) => next,
                Err(source) => {
                    debug!("Stage {} failed after {:?}: {}", stage.name, start.elapsed(), source.cause);
                    return Err(CycleError::Stage {
                        source,
                        stages_applied: applied.clone(),
                    });
                }
            };

            debug!("Stage {} done in {:?}", stage.name, start.elapsed());
            applied.push(stage.name.clone());
        }

        input
            .successor(current.payload)
            .ok_or_else(|| CycleError::VersionExhausted {
                version: input.version,
                stages_applied: applied.clone(),
            })
    }
}

/// Runs one stage on its own task so a panic surfaces as a stage error.
async fn apply_isolated(stage: &StageDescriptor, state: SystemState) -> Result<SystemState, StageError> {
    let transform = stage.transform.clone();
    let task = AbortOnDrop(tokio::spawn(async move { transform.apply(state).await }));

    match task.join().await {
        Ok(Ok(next)) => Ok(next),
        Ok(Err(e)) => Err(StageError::new(&stage.name, e.cause)),
        Err(join_err) if join_err.is_panic() => Err(StageError::new(&stage.name, "stage panicked")),
        Err(_) => Err(StageError::new(&stage.name, "stage task cancelled")),
    }
}

/// Aborts the stage task if the cycle is abandoned (e.g. on timeout).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
