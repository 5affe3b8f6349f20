//! Health monitoring for standby units

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::deploy::process::unit_name;
use crate::errors::PortsideError;
use crate::ssh::CommandRunner;

/// Injectable sleep so tests can run the retry loop on a fake clock.
pub type SleepFn =
    Arc<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The real clock.
pub fn tokio_sleep_fn() -> SleepFn {
    Arc::new(|wait| Box::pin(tokio::time::sleep(wait)))
}

/// A cancellation handle for a deployment attempt. Flip the sender to
/// `true` to abort; the health loop routes the abort through rollback.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Bounded fixed-interval retry policy.
///
/// The interval is constant by design so the worst-case deployment
/// latency stays predictable: `max_retries x retry_interval`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum liveness polls
    pub max_retries: u32,

    /// Fixed interval between polls
    pub retry_interval: Duration,

    /// Optional jitter added on top of each interval
    pub jitter: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_interval: Duration::from_secs(2),
            jitter: None,
        }
    }
}

impl RetryPolicy {
    fn interval(&self) -> Duration {
        match self.jitter {
            Some(jitter) if !jitter.is_zero() => {
                let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
                self.retry_interval + Duration::from_millis(extra)
            }
            _ => self.retry_interval,
        }
    }
}

/// Polls a unit's liveness until it reports active or retries run out.
pub struct HealthMonitor {
    policy: RetryPolicy,
    sleep_fn: SleepFn,
}

impl HealthMonitor {
    pub fn new(policy: RetryPolicy, sleep_fn: SleepFn) -> Self {
        Self { policy, sleep_fn }
    }

    /// Wait for `<app>@<port>` to become active.
    ///
    /// Returns the 1-based attempt number on success; the first success
    /// terminates immediately. A failed poll is retried up to
    /// `max_retries` times with the fixed interval between attempts, so
    /// exhaustion takes exactly `(max_retries - 1)` sleeps. Connection
    /// errors abort at once, and cancellation aborts between polls.
    pub async fn wait_until_active(
        &self,
        runner: &dyn CommandRunner,
        app: &str,
        port: u16,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<u32, PortsideError> {
        let unit = unit_name(app, port);
        let command = format!("systemctl is-active --quiet {}", unit);

        for attempt in 1..=self.policy.max_retries {
            if *cancel.borrow() {
                return Err(PortsideError::Cancelled(format!(
                    "health check for {} aborted",
                    unit
                )));
            }

            debug!(
                "Health check {}/{} for {}",
                attempt, self.policy.max_retries, unit
            );
            let output = runner.exec(&command).await?;
            if output.success() {
                info!("{} active after {} attempt(s)", unit, attempt);
                return Ok(attempt);
            }

            if attempt < self.policy.max_retries {
                tokio::select! {
                    _ = (self.sleep_fn)(self.policy.interval()) => {}
                    changed = cancel.changed() => {
                        if changed.is_ok() && *cancel.borrow() {
                            return Err(PortsideError::Cancelled(format!(
                                "health check for {} aborted",
                                unit
                            )));
                        }
                    }
                }
            }
        }

        warn!(
            "{} did not become active after {} attempts",
            unit, self.policy.max_retries
        );
        Err(PortsideError::HealthCheckExhausted {
            port,
            attempts: self.policy.max_retries,
        })
    }
}
