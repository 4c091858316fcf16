//! Result sink trait abstraction.

use async_trait::async_trait;
use cycler_core::CycleResult;

/// Errors a sink may report. They are logged by the caller and never
/// interrupt the cycle loop.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Receiving side is gone
    #[error("sink '{0}' is closed")]
    Closed(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Consumer of cycle results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Get sink name (used in logs).
    fn name(&self) -> &str;

    /// Deliver one result.
    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError>;
}
