//! Settings file management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::deploy::health::RetryPolicy;
use crate::ledger::PortPolicy;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Standby-port selection policy
    #[serde(default)]
    pub port_policy: PortPolicy,

    /// Health check configuration
    #[serde(default)]
    pub health: HealthSettings,

    /// Pause between stop and start during a restart, in seconds
    #[serde(default = "default_restart_pause")]
    pub restart_pause_secs: u64,

    /// Successful releases kept on the host before pruning
    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,

    /// Terminal history rows kept per instance before pruning
    #[serde(default = "default_keep_history")]
    pub keep_history: usize,

    /// Pending history rows older than this are treated as abandoned, in seconds
    #[serde(default = "default_deployment_timeout")]
    pub deployment_timeout_secs: u64,

    /// Reverse-proxy admin API configuration
    #[serde(default)]
    pub proxy: ProxySettings,
}

fn default_restart_pause() -> u64 {
    1
}

fn default_keep_releases() -> usize {
    5
}

fn default_keep_history() -> usize {
    50
}

fn default_deployment_timeout() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            port_policy: PortPolicy::default(),
            health: HealthSettings::default(),
            restart_pause_secs: default_restart_pause(),
            keep_releases: default_keep_releases(),
            keep_history: default_keep_history(),
            deployment_timeout_secs: default_deployment_timeout(),
            proxy: ProxySettings::default(),
        }
    }
}

impl Settings {
    pub fn restart_pause(&self) -> Duration {
        Duration::from_secs(self.restart_pause_secs)
    }

    pub fn deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.deployment_timeout_secs)
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Maximum liveness polls per deployment
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed interval between polls, in seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Optional jitter added to each interval, in milliseconds
    #[serde(default)]
    pub jitter_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    10
}

fn default_retry_interval() -> u64 {
    2
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval(),
            jitter_ms: None,
        }
    }
}

impl HealthSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            jitter: self.jitter_ms.map(Duration::from_millis),
        }
    }
}

/// Reverse-proxy admin API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Base URL of the proxy admin API on the target host
    #[serde(default = "default_admin_url")]
    pub admin_url: String,

    /// Name of the server entry under `apps.http.servers`
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

fn default_admin_url() -> String {
    "http://127.0.0.1:2019".to_string()
}

fn default_server_name() -> String {
    "portside".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            admin_url: default_admin_url(),
            server_name: default_server_name(),
        }
    }
}
