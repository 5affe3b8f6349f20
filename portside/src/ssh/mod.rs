//! Remote command execution over SSH

pub mod session;
pub mod trust;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::PortsideError;
use crate::models::host::SshHost;

/// Combined output and exit status of one remote command.
///
/// A non-zero exit is not an error at this level; callers decide whether
/// it is fatal. Connection failures surface as `Err(Connection)` instead.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Combined stdout + stderr
    pub output: String,

    /// Remote exit status; None if the channel closed without reporting one
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// A live, authenticated execution context on one host.
///
/// One runner is opened per deployment attempt and reused for every
/// remote call within it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command and return its combined output and exit status.
    async fn exec(&self, command: &str) -> Result<ExecOutput, PortsideError>;

    /// Run a command, forwarding output lines as they arrive.
    ///
    /// Used by the log-follow path. The default buffers the whole output,
    /// which is what fakes want; the SSH session streams for real.
    async fn exec_streamed(
        &self,
        command: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<ExecOutput, PortsideError> {
        let out = self.exec(command).await?;
        for line in out.output.lines() {
            if tx.send(line.to_string()).await.is_err() {
                break;
            }
        }
        Ok(out)
    }
}

/// Opens verified, authenticated runners for hosts.
///
/// The orchestrator only ever sees "a runner or an error"; the host-key
/// trust decision lives behind this seam.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, host: &SshHost) -> Result<Arc<dyn CommandRunner>, PortsideError>;
}
