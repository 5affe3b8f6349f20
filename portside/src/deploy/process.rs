//! Remote process control for systemd template units

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::deploy::health::SleepFn;
use crate::errors::PortsideError;
use crate::ssh::{CommandRunner, ExecOutput};

/// Name of the template-unit instance for an app on a port.
pub fn unit_name(app: &str, port: u16) -> String {
    format!("{}@{}", app, port)
}

/// Start/stop/restart of `<app>@<port>` units on one host.
///
/// Failure of stop or start is fatal to the enclosing deployment attempt;
/// connection failures pass straight through.
pub struct ProcessController {
    runner: Arc<dyn CommandRunner>,
}

impl ProcessController {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `systemctl start <app>@<port>`
    pub async fn start(&self, app: &str, port: u16) -> Result<ExecOutput, PortsideError> {
        self.systemctl("start", app, port).await
    }

    /// `systemctl stop <app>@<port>`
    pub async fn stop(&self, app: &str, port: u16) -> Result<ExecOutput, PortsideError> {
        self.systemctl("stop", app, port).await
    }

    /// Stop, pause briefly so the OS releases the port, then start.
    pub async fn restart(
        &self,
        app: &str,
        port: u16,
        pause: Duration,
        sleep_fn: &SleepFn,
    ) -> Result<ExecOutput, PortsideError> {
        info!("Restarting {}", unit_name(app, port));
        self.stop(app, port).await?;
        sleep_fn(pause).await;
        self.start(app, port).await
    }

    async fn systemctl(
        &self,
        verb: &str,
        app: &str,
        port: u16,
    ) -> Result<ExecOutput, PortsideError> {
        let unit = unit_name(app, port);
        let command = format!("systemctl {} {}", verb, unit);
        debug!("{}", command);

        let output = self.runner.exec(&command).await?;
        if !output.success() {
            return Err(PortsideError::Command {
                command,
                output: output.output,
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name() {
        assert_eq!(unit_name("webapp", 4000), "webapp@4000");
    }
}
