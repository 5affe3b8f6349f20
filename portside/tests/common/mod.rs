//! Shared test doubles: a scripted command runner, an in-memory route
//! table, and fake clocks.

// Each test binary uses a subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use uuid::Uuid;

use portside::deploy::health::SleepFn;
use portside::errors::PortsideError;
use portside::models::application::{Application, Domain};
use portside::models::host::SshHost;
use portside::proxy::RouteTable;
use portside::ssh::{CommandRunner, Connect, ExecOutput};

/// Scripted remote host.
///
/// Records every command it receives. `systemctl is-active` polls are
/// answered from a per-port schedule: a port reports active once it has
/// been polled more than `failing_polls` times. Ports with no schedule
/// never become active.
#[derive(Default)]
pub struct FakeRunner {
    pub commands: Mutex<Vec<String>>,
    failing_polls: Mutex<HashMap<u16, u32>>,
    polls: Mutex<HashMap<u16, u32>>,
    pub fail_start: Mutex<bool>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Port reports active after `failing_polls` failed polls.
    pub fn healthy_after(&self, port: u16, failing_polls: u32) {
        self.failing_polls
            .lock()
            .unwrap()
            .insert(port, failing_polls);
    }

    /// Port stops reporting active from now on.
    pub fn mark_unhealthy(&self, port: u16) {
        self.failing_polls.lock().unwrap().remove(&port);
    }

    pub fn recorded(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.recorded().iter().any(|c| c.contains(needle))
    }

    fn ok() -> ExecOutput {
        ExecOutput {
            output: String::new(),
            exit_status: Some(0),
        }
    }

    fn failed(output: &str) -> ExecOutput {
        ExecOutput {
            output: output.to_string(),
            exit_status: Some(1),
        }
    }
}

fn port_of(command: &str) -> Option<u16> {
    command.rsplit('@').next()?.trim().parse().ok()
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn exec(&self, command: &str) -> Result<ExecOutput, PortsideError> {
        self.commands.lock().unwrap().push(command.to_string());

        if command.starts_with("systemctl start") {
            if *self.fail_start.lock().unwrap() {
                return Ok(Self::failed("Failed to start unit"));
            }
            return Ok(Self::ok());
        }

        if command.starts_with("systemctl is-active") {
            let port = port_of(command).expect("poll command carries a port");
            let mut polls = self.polls.lock().unwrap();
            let seen = polls.entry(port).or_insert(0);
            *seen += 1;
            let threshold = self.failing_polls.lock().unwrap().get(&port).copied();
            return Ok(match threshold {
                Some(failing) if *seen > failing => Self::ok(),
                _ => Self::failed("inactive"),
            });
        }

        // stop, rm -rf, journalctl: accepted silently
        Ok(Self::ok())
    }
}

/// Hands out one shared `FakeRunner` for every connection.
pub struct FakeConnector {
    pub runner: Arc<FakeRunner>,
}

#[async_trait]
impl Connect for FakeConnector {
    async fn connect(&self, _host: &SshHost) -> Result<Arc<dyn CommandRunner>, PortsideError> {
        Ok(self.runner.clone())
    }
}

/// Connector for an unreachable host.
pub struct DownConnector;

#[async_trait]
impl Connect for DownConnector {
    async fn connect(&self, host: &SshHost) -> Result<Arc<dyn CommandRunner>, PortsideError> {
        Err(PortsideError::Connection(format!(
            "{}: connection refused",
            host.address
        )))
    }
}

/// In-memory route table standing in for the proxy admin API.
#[derive(Default)]
pub struct MemoryRoutes {
    pub routes: Mutex<HashMap<String, u16>>,
    pub fail_writes: Mutex<bool>,
    writes: Mutex<u32>,
    fail_at_write: Mutex<Option<u32>>,
}

impl MemoryRoutes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn port_for(&self, domain: &str) -> Option<u16> {
        self.routes.lock().unwrap().get(domain).copied()
    }

    /// Fail the nth route write from now (1-based); writes before and
    /// after it succeed.
    pub fn fail_nth_write(&self, n: u32) {
        let seen = *self.writes.lock().unwrap();
        *self.fail_at_write.lock().unwrap() = Some(seen + n);
    }
}

#[async_trait]
impl RouteTable for MemoryRoutes {
    async fn ensure_base_structure(&self) -> Result<(), PortsideError> {
        Ok(())
    }

    async fn set_route(&self, domain: &str, port: u16) -> Result<(), PortsideError> {
        let seen = {
            let mut writes = self.writes.lock().unwrap();
            *writes += 1;
            *writes
        };
        let scheduled_failure = *self.fail_at_write.lock().unwrap() == Some(seen);
        if *self.fail_writes.lock().unwrap() || scheduled_failure {
            return Err(PortsideError::ProxyConfig(
                "admin API returned 500".to_string(),
            ));
        }
        self.routes
            .lock()
            .unwrap()
            .insert(domain.to_string(), port);
        Ok(())
    }

    async fn delete_route(&self, domain: &str) -> Result<(), PortsideError> {
        self.routes.lock().unwrap().remove(domain);
        Ok(())
    }
}

/// A clock that never waits.
pub fn instant_sleep_fn() -> SleepFn {
    Arc::new(|_| Box::pin(async {}))
}

/// A clock that never waits but remembers what it was asked to wait for.
pub fn recording_sleep_fn(record: Arc<Mutex<Vec<Duration>>>) -> SleepFn {
    Arc::new(move |wait| {
        record.lock().unwrap().push(wait);
        Box::pin(async {})
    })
}

pub fn test_app(name: &str) -> Application {
    Application {
        id: Uuid::new_v4(),
        name: name.to_string(),
    }
}

pub fn test_host(name: &str) -> SshHost {
    SshHost {
        id: Uuid::new_v4(),
        name: name.to_string(),
        address: "192.0.2.10".to_string(),
        port: 22,
        user: "deploy".to_string(),
        password: Some(SecretString::from("hunter2".to_string())),
        private_key: None,
        private_key_passphrase: None,
        host_key_fingerprint: None,
        arch: Some("amd64".to_string()),
    }
}

pub fn test_domain(hostname: &str) -> Domain {
    Domain {
        id: Uuid::new_v4(),
        instance_id: Uuid::new_v4(),
        hostname: hostname.to_string(),
        is_primary: true,
    }
}
