//! JSON file state store.
//!
//! Keeps the current state in memory and mirrors it to `<root>/state.json`.
//! Writes go to a temporary file first and are renamed into place, so a crash
//! mid-write leaves the previous version on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use cycler_core::SystemState;
use super::{trait_::check_version, Result, StateStore, StoreError};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

const STATE_FILE: &str = "state.json";

/// File-backed state store.
pub struct JsonStateStore {
    root: PathBuf,
    slot: RwLock<Arc<SystemState>>,
}

impl JsonStateStore {
    /// Open the store under `root`.
    ///
    /// Resumes from an existing `state.json` if there is one, otherwise
    /// writes `seed`. A file that cannot be parsed is reported as
    /// [`StoreError::Corrupted`].
    pub async fn open(root: impl AsRef<Path>, seed: SystemState) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let path = root.join(STATE_FILE);
        let state = match read_state(&path).await? {
            Some(existing) => {
                info!("Resuming state version {} from {}", existing.version, path.display());
                existing
            }
            None => {
                write_atomic(&root, &seed).await?;
                info!("Seeded state at {}", path.display());
                seed
            }
        };

        Ok(Self {
            root,
            slot: RwLock::new(Arc::new(state)),
        })
    }

    /// Path of the persisted state file.
    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Confirm the file still holds the version we last wrote.
    async fn verify_disk(&self, expected: u64) -> Result<()> {
        let on_disk = read_state(&self.state_path())
            .await?
            .ok_or_else(|| StoreError::Corrupted(format!("{} disappeared", STATE_FILE)))?;

        if on_disk.version != expected {
            return Err(StoreError::Corrupted(format!(
                "{} holds version {}, expected {}",
                STATE_FILE, on_disk.version, expected
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn get(&self) -> Result<Arc<SystemState>> {
        Ok(self.slot.read().await.clone())
    }

    async fn set(&self, state: SystemState) -> Result<Arc<SystemState>> {
        let mut slot = self.slot.write().await;
        check_version(&slot, &state)?;
        self.verify_disk(slot.version).await?;

        write_atomic(&self.root, &state).await?;
        debug!("Persisted state version {}", state.version);

        let state = Arc::new(state);
        *slot = state.clone();
        Ok(state)
    }
}

async fn read_state(path: &Path) -> Result<Option<SystemState>> {
    match fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Corrupted(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(root: &Path, state: &SystemState) -> Result<()> {
    let tmp = root.join(format!("{}.tmp", STATE_FILE));
    let json = serde_json::to_string_pretty(state)?;
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, root.join(STATE_FILE)).await?;
    Ok(())
}
