//! Webhook sink - POSTs results as JSON.

use super::trait_::{ResultSink, SinkError};
use async_trait::async_trait;
use cycler_core::CycleResult;
use std::time::Duration;
use tracing::debug;

/// Sends each result to an HTTP endpoint.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Create a sink posting to `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Target endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ResultSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(result).send().await?;
        let status = response.status();
        debug!("Webhook {} answered {}", self.url, status);

        if !status.is_success() {
            return Err(SinkError::Other(format!("webhook {} answered {}", self.url, status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::tests::sample_result;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let sink = WebhookSink::new("http://127.0.0.1:9/cycles", Duration::from_millis(500)).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/cycles");

        let err = sink.publish(&sample_result(0)).await.unwrap_err();
        assert!(matches!(err, SinkError::Http(_)));
    }
}
