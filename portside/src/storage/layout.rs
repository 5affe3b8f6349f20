//! Storage layout configuration

use std::path::PathBuf;

use tokio::fs;

use crate::errors::PortsideError;

/// Filesystem layout for the orchestrator's local state.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the ledger file path (instances, deployments, history, artifacts)
    pub fn ledger_file(&self) -> PathBuf {
        self.base_dir.join("ledger.json")
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("settings.json")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), PortsideError> {
        fs::create_dir_all(&self.base_dir).await?;
        fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/portside");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".portside");

        Self::new(base_dir)
    }
}
