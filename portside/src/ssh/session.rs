//! SSH session and connector

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::PortsideError;
use crate::models::host::SshHost;
use crate::ssh::trust::HostKeyPolicy;
use crate::ssh::{CommandRunner, Connect, ExecOutput};

/// Client handler enforcing the host-key trust policy during handshake.
struct HostKeyVerifier {
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.policy.verify(&server_public_key.fingerprint()))
    }
}

/// One authenticated SSH session to a host.
///
/// Every `exec` opens its own channel and releases it on all exit paths;
/// the underlying transport is reused for the whole deployment attempt.
pub struct SshSession {
    handle: client::Handle<HostKeyVerifier>,
    host_name: String,
}

impl SshSession {
    /// Connect and authenticate against a host.
    ///
    /// Key auth is tried first when a private key is configured, then
    /// password auth. Host-key rejection and unreachable hosts both
    /// surface as connection-class errors.
    pub async fn connect(host: &SshHost, policy: HostKeyPolicy) -> Result<Self, PortsideError> {
        host.validate()?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        debug!("Connecting to {} ({}:{})", host.name, host.address, host.port);
        let verifier = HostKeyVerifier { policy };
        let mut handle =
            client::connect(config, (host.address.as_str(), host.port), verifier)
                .await
                .map_err(|e| classify_connect_error(host, e))?;

        let mut authenticated = false;

        if let Some(private_key) = &host.private_key {
            let passphrase = host
                .private_key_passphrase
                .as_ref()
                .map(|p| p.expose_secret());
            match russh_keys::decode_secret_key(private_key.expose_secret(), passphrase) {
                Ok(keypair) => {
                    authenticated = handle
                        .authenticate_publickey(&host.user, Arc::new(keypair))
                        .await
                        .map_err(|e| PortsideError::Connection(e.to_string()))?;
                    if !authenticated {
                        warn!("Key authentication refused for {}@{}", host.user, host.name);
                    }
                }
                Err(e) => {
                    warn!("Unusable private key for {}: {}", host.name, e);
                }
            }
        }

        if !authenticated {
            if let Some(password) = &host.password {
                authenticated = handle
                    .authenticate_password(&host.user, password.expose_secret())
                    .await
                    .map_err(|e| PortsideError::Connection(e.to_string()))?;
            }
        }

        if !authenticated {
            return Err(PortsideError::Connection(format!(
                "authentication failed for {}@{}",
                host.user, host.name
            )));
        }

        info!("Connected to {} as {}", host.name, host.user);
        Ok(Self {
            handle,
            host_name: host.name.clone(),
        })
    }

    /// Close the session. Errors on disconnect are ignored; the remote
    /// side may already have dropped the transport.
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await;
    }
}

fn classify_connect_error(host: &SshHost, err: russh::Error) -> PortsideError {
    match err {
        russh::Error::UnknownKey => PortsideError::HostKeyRejected(format!(
            "host key for {} did not satisfy the trust policy",
            host.name
        )),
        other => PortsideError::Connection(format!("{}: {}", host.name, other)),
    }
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, PortsideError> {
        debug!("[{}] exec: {}", self.host_name, command);

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| PortsideError::Connection(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| PortsideError::Connection(e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(&data[..]),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(&data[..]),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        Ok(ExecOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_status,
        })
    }

    async fn exec_streamed(
        &self,
        command: &str,
        tx: mpsc::Sender<String>,
    ) -> Result<ExecOutput, PortsideError> {
        debug!("[{}] exec (streamed): {}", self.host_name, command);

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| PortsideError::Connection(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| PortsideError::Connection(e.to_string()))?;

        let mut output = Vec::new();
        let mut pending = String::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                    output.extend_from_slice(&data[..]);
                    pending.push_str(&String::from_utf8_lossy(&data[..]));
                    while let Some(idx) = pending.find('\n') {
                        let line: String = pending.drain(..=idx).collect();
                        if tx.send(line.trim_end().to_string()).await.is_err() {
                            // Receiver gone; stop forwarding but drain the channel.
                            pending.clear();
                            break;
                        }
                    }
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        if !pending.is_empty() {
            let _ = tx.send(pending.trim_end().to_string()).await;
        }

        Ok(ExecOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_status,
        })
    }
}

/// Default connector: opens one `SshSession` per deployment attempt.
pub struct SshConnector {
    /// Policy applied when the host has no pinned fingerprint
    pub fallback_policy: HostKeyPolicy,

    /// Upper bound on connect + authenticate
    pub connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(fallback_policy: HostKeyPolicy) -> Self {
        Self {
            fallback_policy,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// A pinned fingerprint on the host record always wins over the
    /// connector's fallback policy.
    fn policy_for(&self, host: &SshHost) -> HostKeyPolicy {
        match &host.host_key_fingerprint {
            Some(fingerprint) => HostKeyPolicy::Pinned(fingerprint.clone()),
            None => self.fallback_policy.clone(),
        }
    }
}

#[async_trait]
impl Connect for SshConnector {
    async fn connect(&self, host: &SshHost) -> Result<Arc<dyn CommandRunner>, PortsideError> {
        let policy = self.policy_for(host);
        let session = tokio::time::timeout(self.connect_timeout, SshSession::connect(host, policy))
            .await
            .map_err(|_| {
                PortsideError::Connection(format!("timed out connecting to {}", host.name))
            })??;
        Ok(Arc::new(session))
    }
}
