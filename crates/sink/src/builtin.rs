//! Built-in sinks (log, channel, callback, fan-out).

use super::trait_::{ResultSink, SinkError};
use async_trait::async_trait;
use cycler_core::{CycleOutcome, CycleResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Writes every result to the tracing log.
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError> {
        match &result.outcome {
            CycleOutcome::Success => info!(
                cycle = %result.cycle_id,
                "Cycle v{} -> v{} in {}ms [{}]",
                result.input_version,
                result.output_version,
                result.duration_ms,
                result.stages_applied.join(" → "),
            ),
            CycleOutcome::Failure { reason } => warn!(
                cycle = %result.cycle_id,
                "Cycle on v{} failed after {}ms: {}",
                result.input_version,
                result.duration_ms,
                reason,
            ),
        }
        Ok(())
    }
}

/// Forwards results into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CycleResult>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CycleResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError> {
        self.tx
            .send(result.clone())
            .map_err(|_| SinkError::Closed(self.name().to_string()))
    }
}

type Callback = dyn Fn(&CycleResult) -> Result<(), SinkError> + Send + Sync;

/// Hands results to a closure.
pub struct CallbackSink {
    name: String,
    callback: Box<Callback>,
}

impl CallbackSink {
    /// Create a sink that calls `callback` for every result.
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&CycleResult) -> Result<(), SinkError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl ResultSink for CallbackSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError> {
        (self.callback)(result)
    }
}

/// Publishes to several sinks in turn.
///
/// Every sink sees every result; a failing sink is logged and the first
/// error is returned once all sinks have been tried.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    /// Create a fan-out over `sinks`.
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }

    /// Number of wrapped sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no wrapped sinks.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(result).await {
                warn!("Sink '{}' failed: {}", sink.name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
