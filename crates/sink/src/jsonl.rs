//! JSON Lines file sink.

use super::trait_::{ResultSink, SinkError};
use async_trait::async_trait;
use cycler_core::CycleResult;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends one JSON object per line for every result.
///
/// This is the way to keep a history of cycles: the state store itself
/// only holds the latest version.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    /// Open (or create) the file for appending.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn publish(&self, result: &CycleResult) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
