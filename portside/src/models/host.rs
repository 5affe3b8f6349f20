//! SSH host model

use secrecy::SecretString;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::PortsideError;

/// A remote deployment target.
///
/// Credentials are held behind `SecretString` and exposed only at the
/// point of connection. At least one of `password` / `private_key` must
/// be set.
#[derive(Debug, Clone, Deserialize)]
pub struct SshHost {
    /// Unique host ID
    pub id: Uuid,

    /// Operator-facing host name
    pub name: String,

    /// Address (IP or hostname)
    pub address: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login user
    pub user: String,

    /// Login password, if password auth is configured
    #[serde(default)]
    pub password: Option<SecretString>,

    /// PEM-encoded private key, if key auth is configured
    #[serde(default)]
    pub private_key: Option<SecretString>,

    /// Passphrase for the private key
    #[serde(default)]
    pub private_key_passphrase: Option<SecretString>,

    /// Pinned host key fingerprint (SHA256, base64)
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,

    /// Architecture tag, e.g. "amd64" or "arm64"
    #[serde(default)]
    pub arch: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshHost {
    /// Validate that the host carries at least one usable credential.
    pub fn validate(&self) -> Result<(), PortsideError> {
        if self.password.is_none() && self.private_key.is_none() {
            return Err(PortsideError::ConfigError(format!(
                "host {} has neither password nor private key",
                self.name
            )));
        }
        Ok(())
    }
}
