//! Error types for the Portside deployment core

use thiserror::Error;

/// Main error type for the deployment core.
///
/// `Connection` and `Command` are deliberately distinct: a connection
/// failure aborts the calling operation, while a failed remote command is
/// data the caller classifies (host unreachable vs command failed).
#[derive(Error, Debug)]
pub enum PortsideError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Remote command failed: `{command}`: {output}")]
    Command { command: String, output: String },

    #[error("Health check exhausted for port {port} after {attempts} attempts")]
    HealthCheckExhausted { port: u16, attempts: u32 },

    #[error("Proxy config error: {0}")]
    ProxyConfig(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("No build artifact found: {0}")]
    ArtifactNotFound(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Deployment cancelled: {0}")]
    Cancelled(String),
}

impl From<anyhow::Error> for PortsideError {
    fn from(err: anyhow::Error) -> Self {
        PortsideError::Ledger(err.to_string())
    }
}

impl PortsideError {
    /// Whether the error means the host could not be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(self, PortsideError::Connection(_) | PortsideError::HostKeyRejected(_))
    }
}
