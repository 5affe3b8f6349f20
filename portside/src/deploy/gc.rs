//! Reclamation of stale deployment instances and old releases

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::process::ProcessController;
use crate::errors::PortsideError;
use crate::ledger::history::HistoryRecorder;
use crate::ledger::InstanceLedger;
use crate::models::application::{Application, ApplicationInstance};
use crate::models::deployment::{DeploymentStatus, HistoryStatus};
use crate::ssh::CommandRunner;

/// Reclaims superseded deployment instances after a promotion.
///
/// Rows on the current `active_port` or `previous_active_port` are never
/// touched.
pub struct GarbageCollector {
    ledger: InstanceLedger,
    history: HistoryRecorder,
    keep_releases: usize,
    keep_history: usize,
}

impl GarbageCollector {
    pub fn new(
        ledger: InstanceLedger,
        history: HistoryRecorder,
        keep_releases: usize,
        keep_history: usize,
    ) -> Self {
        Self {
            ledger,
            history,
            keep_releases,
            keep_history,
        }
    }

    /// Stop and mark stale rows, prune old release directories, and trim
    /// the audit trail. Returns the number of rows reclaimed.
    pub async fn collect(
        &self,
        runner: &Arc<dyn CommandRunner>,
        app: &Application,
        instance: &ApplicationInstance,
    ) -> Result<usize, PortsideError> {
        let Some(active) = instance.active_port else {
            debug!("Instance {} has no active port; nothing to collect", instance.id);
            return Ok(0);
        };
        let protected_standby = instance.previous_active_port.unwrap_or(active);

        let stale = self
            .ledger
            .find_stale(instance.id, active, protected_standby)
            .await?;

        let controller = ProcessController::new(runner.clone());
        let mut reclaimed = 0;

        for row in &stale {
            if row.status != DeploymentStatus::Stopped {
                match controller.stop(&app.name, row.port).await {
                    Ok(_) => info!("Stopped stale unit {}@{}", app.name, row.port),
                    Err(e) if e.is_connection() => return Err(e),
                    Err(e) => {
                        // The unit may already be gone; record and move on.
                        warn!("Stopping stale unit {}@{}: {}", app.name, row.port, e);
                    }
                }
            }
            self.ledger
                .mark_deployment(row.id, DeploymentStatus::Stopped)
                .await?;
            reclaimed += 1;
        }

        self.prune_releases(runner, instance).await?;
        let pruned = self.history.prune(instance.id, self.keep_history).await?;
        if pruned > 0 {
            debug!("Pruned {} audit rows for instance {}", pruned, instance.id);
        }

        Ok(reclaimed)
    }

    /// Remove remote release directories beyond the newest
    /// `keep_releases` successful versions. Directories referenced by
    /// the active or previous-active rows are always kept.
    async fn prune_releases(
        &self,
        runner: &Arc<dyn CommandRunner>,
        instance: &ApplicationInstance,
    ) -> Result<(), PortsideError> {
        let mut protected: HashSet<String> = HashSet::new();

        for port in [instance.active_port, instance.previous_active_port]
            .into_iter()
            .flatten()
        {
            if let Some(row) = self.ledger.deployment_on_port(instance.id, port).await? {
                protected.insert(row.release_path);
            }
        }

        let mut kept = 0;
        let mut doomed: Vec<String> = Vec::new();
        for entry in self.history.entries_for(instance.id).await? {
            if entry.status != HistoryStatus::Success {
                continue;
            }
            if protected.contains(&entry.release_path) {
                continue;
            }
            if kept < self.keep_releases {
                protected.insert(entry.release_path);
                kept += 1;
            } else if !doomed.contains(&entry.release_path) {
                doomed.push(entry.release_path);
            }
        }

        for path in doomed {
            let command = format!("rm -rf '{}'", path);
            match runner.exec(&command).await {
                Ok(output) if output.success() => {
                    info!("Removed old release {}", path);
                }
                Ok(output) => {
                    warn!("Removing release {}: {}", path, output.output);
                }
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => warn!("Removing release {}: {}", path, e),
            }
        }

        Ok(())
    }
}
