//! Configuration file for the `cycler` binary.
//!
//! ```json
//! {
//!   "cycleIntervalMs": 1000,
//!   "cycleTimeoutMs": 5000,
//!   "stageOrder": ["encode", "optimize", "evolve", "enhance", "measure"],
//!   "seedState": { "version": 0, "payload": "init" },
//!   "sinks": [{ "type": "log" }, { "type": "jsonl", "path": "cycles.jsonl" }]
//! }
//! ```

use cycler_core::SystemState;
use cycler_execution::SchedulerConfig;
use cycler_sink::{JsonLinesSink, LogSink, ResultSink, SinkError, WebhookSink};
use cycler_stages::{RegistryError, StageRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Config file picked up from the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "cycler.json";

/// Errors loading or validating a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid config JSON
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// `cycleTimeoutMs` is zero
    #[error("cycleTimeoutMs must be greater than 0")]
    ZeroTimeout,

    /// `resultCapacity` is zero
    #[error("resultCapacity must be greater than 0")]
    ZeroResultCapacity,

    /// `stageOrder` is empty
    #[error("stageOrder must name at least one stage")]
    EmptyStageOrder,

    /// `stageOrder` names a stage twice
    #[error("stageOrder lists '{0}' more than once")]
    DuplicateStage(String),

    /// `stageOrder` names a stage nobody registered
    #[error(transparent)]
    UnknownStage(#[from] RegistryError),
}

/// Initial state used when the store is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedState {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub payload: Value,
}

impl Default for SeedState {
    fn default() -> Self {
        Self {
            version: 0,
            payload: Value::Null,
        }
    }
}

/// Where cycle results go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Log,
    Jsonl {
        path: PathBuf,
    },
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout_ms", rename = "timeoutMs")]
        timeout_ms: u64,
    },
}

impl SinkConfig {
    async fn build(&self) -> Result<Arc<dyn ResultSink>, SinkError> {
        Ok(match self {
            SinkConfig::Log => Arc::new(LogSink),
            SinkConfig::Jsonl { path } => Arc::new(JsonLinesSink::open(path).await?),
            SinkConfig::Webhook { url, timeout_ms } => {
                Arc::new(WebhookSink::new(url.as_str(), Duration::from_millis(*timeout_ms))?)
            }
        })
    }
}

/// Top-level config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CyclerConfig {
    #[serde(default = "default_interval_ms")]
    pub cycle_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub cycle_timeout_ms: u64,
    #[serde(default = "StageRegistry::builtin_order")]
    pub stage_order: Vec<String>,
    #[serde(default)]
    pub seed_state: SeedState,
    #[serde(default)]
    pub max_cycles: Option<u64>,
    /// Directory for the JSON state store; in-memory when absent
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,
    /// Results buffered for the sinks before new ones are dropped
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

fn default_result_capacity() -> usize {
    1024
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::Log]
}

impl Default for CyclerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_interval_ms(),
            cycle_timeout_ms: default_timeout_ms(),
            stage_order: StageRegistry::builtin_order(),
            seed_state: SeedState::default(),
            max_cycles: None,
            state_path: None,
            sinks: default_sinks(),
            result_capacity: default_result_capacity(),
        }
    }
}

impl CyclerConfig {
    /// Parse a config from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Load `path`, or `cycler.json` if present, or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(Path::new(DEFAULT_CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    /// Check bounds and that every stage in `stageOrder` is known.
    pub fn validate(&self, registry: &StageRegistry) -> Result<(), ConfigError> {
        if self.cycle_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.result_capacity == 0 {
            return Err(ConfigError::ZeroResultCapacity);
        }
        if self.stage_order.is_empty() {
            return Err(ConfigError::EmptyStageOrder);
        }

        let mut seen = HashSet::new();
        for name in &self.stage_order {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateStage(name.clone()));
            }
        }

        registry.resolve(&self.stage_order)?;
        Ok(())
    }

    /// Timing settings for the scheduler.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let config = SchedulerConfig::new()
            .with_interval(Duration::from_millis(self.cycle_interval_ms))
            .with_timeout(Duration::from_millis(self.cycle_timeout_ms))
            .with_result_capacity(self.result_capacity);

        match self.max_cycles {
            Some(n) => config.with_max_cycles(n),
            None => config,
        }
    }

    /// The state to seed an empty store with.
    pub fn seed(&self) -> SystemState {
        SystemState::new(self.seed_state.version, self.seed_state.payload.clone())
    }

    /// Build the configured sinks; none at all discards results.
    pub async fn build_sinks(&self) -> Result<Vec<Arc<dyn ResultSink>>, SinkError> {
        let mut sinks = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            sinks.push(sink.build().await?);
        }
        Ok(sinks)
    }
}
