//! JSON-file persistence for the ledger.
//!
//! The whole ledger state lives in memory behind one `RwLock`; every
//! mutation runs against a copy, persists atomically (temp file +
//! rename), then commits. The write-lock critical section is the
//! transaction boundary the port-assignment operations rely on.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::errors::PortsideError;
use crate::models::application::ApplicationInstance;
use crate::models::artifact::BuildArtifact;
use crate::models::deployment::{DeploymentHistory, DeploymentInstance};

/// Everything the persistence collaborator holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct LedgerState {
    #[serde(default)]
    pub instances: Vec<ApplicationInstance>,

    #[serde(default)]
    pub deployments: Vec<DeploymentInstance>,

    #[serde(default)]
    pub history: Vec<DeploymentHistory>,

    #[serde(default)]
    pub artifacts: Vec<BuildArtifact>,
}

/// File-backed ledger store.
pub struct LedgerStore {
    path: Option<PathBuf>,
    state: RwLock<LedgerState>,
}

impl LedgerStore {
    /// Open a store backed by the given file, loading existing state.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>, PortsideError> {
        let path = path.into();
        let state = if fs::metadata(&path).await.is_ok() {
            let contents = fs::read_to_string(&path).await?;
            serde_json::from_str(&contents)?
        } else {
            LedgerState::default()
        };

        Ok(Arc::new(Self {
            path: Some(path),
            state: RwLock::new(state),
        }))
    }

    /// An ephemeral store that never touches disk. Test hook.
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self {
            path: None,
            state: RwLock::new(LedgerState::default()),
        })
    }

    pub(crate) async fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        let guard = self.state.read().await;
        f(&guard)
    }

    /// Run a mutation as a transaction: apply to a copy, persist, commit.
    /// If the closure or the write fails, in-memory state is untouched.
    pub(crate) async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<R, PortsideError>,
    ) -> Result<R, PortsideError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let result = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(result)
    }

    async fn persist(&self, state: &LedgerState) -> Result<(), PortsideError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(state)?;
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}
