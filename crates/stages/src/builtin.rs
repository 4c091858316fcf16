//! Built-in stages (encode, optimize, evolve, enhance, measure).
//!
//! These carry no numerical meaning. They shape the payload in small,
//! observable ways so a pipeline can run end to end without an external
//! backend. Real backends plug in through [`Stage`] or [`FnStage`].

use super::r#trait::{Stage, StageError};
use async_trait::async_trait;
use cycler_core::SystemState;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Normalizes the payload into a JSON object.
///
/// Non-object payloads are wrapped as `{"value": <payload>}`.
pub struct EncodeStage;

#[async_trait]
impl Stage for EncodeStage {
    fn name(&self) -> &str {
        "encode"
    }

    fn description(&self) -> &str {
        "Wrap the payload into an object"
    }

    async fn apply(&self, mut state: SystemState) -> Result<SystemState, StageError> {
        let payload = Value::Object(objectify(state.payload.take()));
        Ok(state.with_payload(payload))
    }
}

/// Counts how many times it has been applied under `payload.tally.<name>`.
///
/// Scalar payloads are wrapped the same way [`EncodeStage`] does.
pub struct TallyStage {
    name: String,
    description: String,
}

impl TallyStage {
    /// Create a tally stage with the given name.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// The `optimize` stage.
    pub fn optimize() -> Self {
        Self::new("optimize", "Tally an optimization pass")
    }

    /// The `evolve` stage.
    pub fn evolve() -> Self {
        Self::new("evolve", "Tally an evolution step")
    }

    /// The `enhance` stage.
    pub fn enhance() -> Self {
        Self::new("enhance", "Tally an enhancement pass")
    }
}

#[async_trait]
impl Stage for TallyStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn apply(&self, mut state: SystemState) -> Result<SystemState, StageError> {
        let mut map = objectify(state.payload.take());

        let tally = map
            .entry("tally")
            .or_insert_with(|| Value::Object(Map::new()));
        let kind = kind_of(tally);
        let tally = tally.as_object_mut().ok_or_else(|| {
            StageError::new(&self.name, format!("payload.tally must be an object, found {}", kind))
        })?;

        let count = tally.get(&self.name).and_then(Value::as_u64).unwrap_or(0);
        tally.insert(self.name.clone(), json!(count.saturating_add(1)));

        Ok(state.with_payload(Value::Object(map)))
    }
}

/// Records a measurement of the payload under `payload.measurement`.
pub struct MeasureStage;

#[async_trait]
impl Stage for MeasureStage {
    fn name(&self) -> &str {
        "measure"
    }

    fn description(&self) -> &str {
        "Record version and payload shape"
    }

    async fn apply(&self, mut state: SystemState) -> Result<SystemState, StageError> {
        let mut map = objectify(state.payload.take());

        let keys = map.keys().filter(|k| k.as_str() != "measurement").count();
        map.insert(
            "measurement".to_string(),
            json!({ "version": state.version, "keys": keys }),
        );

        Ok(state.with_payload(Value::Object(map)))
    }
}

fn objectify(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

type StageFn = dyn Fn(SystemState) -> Result<SystemState, StageError> + Send + Sync;

/// Stage backed by a closure.
///
/// The quickest way to plug an external backend into a pipeline.
pub struct FnStage {
    name: String,
    func: Box<StageFn>,
}

impl FnStage {
    /// Create a stage that runs `func`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(SystemState) -> Result<SystemState, StageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// A stage that returns the state untouched.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, |state| Ok(state))
    }
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, state: SystemState) -> Result<SystemState, StageError> {
        (self.func)(state)
    }
}

/// Sleeps before delegating to the wrapped stage.
pub struct DelayStage {
    inner: Arc<dyn Stage>,
    delay: Duration,
}

impl DelayStage {
    /// Wrap `inner` with a fixed delay.
    pub fn new(inner: Arc<dyn Stage>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Stage for DelayStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    async fn apply(&self, state: SystemState) -> Result<SystemState, StageError> {
        debug!("Delaying stage {} by {:?}", self.inner.name(), self.delay);
        tokio::time::sleep(self.delay).await;
        self.inner.apply(state).await
    }
}
