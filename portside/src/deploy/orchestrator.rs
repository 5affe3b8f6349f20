//! Deployment orchestrator
//!
//! Drives one attempt through the state machine:
//! `Queued -> ArtifactResolved -> Started -> HealthChecking ->
//! {Promoted | RolledBack} -> Recorded`. The proxy is only ever touched
//! after a health pass, and a failed attempt always leaves the previous
//! release serving.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deploy::fsm::{AttemptEvent, AttemptFsm};
use crate::deploy::gc::GarbageCollector;
use crate::deploy::health::{tokio_sleep_fn, HealthMonitor, SleepFn};
use crate::deploy::process::{unit_name, ProcessController};
use crate::errors::PortsideError;
use crate::ledger::artifacts::ArtifactStore;
use crate::ledger::history::HistoryRecorder;
use crate::ledger::store::LedgerStore;
use crate::ledger::{InstanceLedger, StagedDeployment};
use crate::models::application::{Application, ApplicationInstance, Domain, InstanceStatus};
use crate::models::artifact::BuildArtifact;
use crate::models::deployment::{DeploymentHistory, DeploymentStatus, HistoryStatus};
use crate::models::host::SshHost;
use crate::models::release::Release;
use crate::proxy::RouteTable;
use crate::ssh::{CommandRunner, Connect};
use crate::storage::settings::Settings;

/// Result of a successful deployment.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// Audit row for the attempt
    pub history_id: Uuid,

    /// Port now serving traffic
    pub active_port: u16,

    /// Port of the superseded release, the rollback candidate
    pub previous_active_port: Option<u16>,

    /// Health polls it took for the standby to come up
    pub health_attempts: u32,
}

/// Operator-facing status of one application instance.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub instance: ApplicationInstance,

    /// Raw `systemctl is-active` output for the active unit, when the
    /// host was reachable
    pub unit_state: Option<String>,

    /// Recent audit rows, newest first
    pub recent: Vec<DeploymentHistory>,
}

/// Captured output of every step of an attempt; lands in the audit row.
struct AttemptLog {
    lines: Vec<String>,
}

impl AttemptLog {
    fn new() -> Self {
        Self { lines: Vec::new() }
    }

    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn push_remote(&mut self, context: &str, output: &str) {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            self.lines.push(format!("{}: ok", context));
        } else {
            self.lines.push(format!("{}: {}", context, trimmed));
        }
    }

    fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// The top-level deployment state machine.
pub struct Orchestrator {
    ledger: InstanceLedger,
    history: HistoryRecorder,
    artifacts: ArtifactStore,
    routes: Arc<dyn RouteTable>,
    connector: Arc<dyn Connect>,
    settings: Settings,
    sleep_fn: SleepFn,
}

impl Orchestrator {
    pub fn new(
        store: Arc<LedgerStore>,
        routes: Arc<dyn RouteTable>,
        connector: Arc<dyn Connect>,
        settings: Settings,
    ) -> Self {
        Self {
            ledger: InstanceLedger::new(store.clone()),
            history: HistoryRecorder::new(store.clone()),
            artifacts: ArtifactStore::new(store),
            routes,
            connector,
            settings,
            sleep_fn: tokio_sleep_fn(),
        }
    }

    /// Swap the clock out; tests drive the retry loops without sleeping.
    pub fn with_sleep_fn(mut self, sleep_fn: SleepFn) -> Self {
        self.sleep_fn = sleep_fn;
        self
    }

    pub fn ledger(&self) -> &InstanceLedger {
        &self.ledger
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Standard blue-green deployment of a release to one target.
    pub async fn deploy(
        &self,
        app: &Application,
        host: &SshHost,
        domains: &[Domain],
        release: &Release,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<DeployOutcome, PortsideError> {
        host.validate()?;
        let instance = self.ledger.instance_for(app.id, host.id).await?;

        // A crash-orphaned pending row older than the deployment timeout
        // no longer guards a live attempt.
        let abandoned = self
            .history
            .abandon_pending(instance.id, self.settings.deployment_timeout())
            .await?;
        if abandoned > 0 {
            warn!(
                "Abandoned {} stale pending attempt(s) for {} on {}",
                abandoned, app.name, host.name
            );
        }

        // Fail fast with "no build" before creating the attempt; the
        // lookup is local and has no side effects.
        let artifact = self.artifacts.resolve(release).await?;

        let history_id = self
            .history
            .begin(instance.id, &release.version, &artifact.local_path)
            .await?;

        let mut fsm = AttemptFsm::new();
        let mut log = AttemptLog::new();
        log.push(format!(
            "deploying {} version {} to {} (release {})",
            app.name, release.version, host.name, artifact.local_path
        ));

        let result = self
            .run_attempt(
                app, host, domains, &instance, &artifact, release, &mut fsm, &mut log, cancel,
            )
            .await;

        match result {
            Ok(outcome) => {
                self.history
                    .finish(
                        history_id,
                        HistoryStatus::Success,
                        &log.render(),
                        Some(outcome.port),
                    )
                    .await?;
                fsm.process(AttemptEvent::Record)
                    .map_err(PortsideError::DeployError)?;
                info!(
                    "Deployed {} version {} to {} on port {}",
                    app.name, release.version, host.name, outcome.port
                );
                Ok(DeployOutcome {
                    history_id,
                    active_port: outcome.port,
                    previous_active_port: outcome.instance.previous_active_port,
                    health_attempts: outcome.health_attempts,
                })
            }
            Err(e) => {
                log.push(format!("failed: {}", e));
                if let Err(finish_err) = self
                    .history
                    .finish(history_id, HistoryStatus::Failed, &log.render(), None)
                    .await
                {
                    error!("Failed to finalize audit row {}: {}", history_id, finish_err);
                }
                let _ = fsm.process(AttemptEvent::Record);
                error!(
                    "Deployment of {} version {} to {} failed: {}",
                    app.name, release.version, host.name, e
                );
                Err(e)
            }
        }
    }

    /// First deployment of an application instance. The "standby" is the
    /// first port ever used; the path is otherwise identical to `deploy`.
    pub async fn launch(
        &self,
        app: &Application,
        host: &SshHost,
        domains: &[Domain],
        release: &Release,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<DeployOutcome, PortsideError> {
        let instance = self.ledger.instance_for(app.id, host.id).await?;
        if let Some(port) = instance.active_port {
            return Err(PortsideError::DeployError(format!(
                "{} on {} already serves on port {}; use deploy",
                app.name, host.name, port
            )));
        }
        self.deploy(app, host, domains, release, cancel).await
    }

    /// Same-port restart: stop, pause, start, health check. No standby
    /// computation, no proxy mutation, no ledger port change.
    pub async fn restart(
        &self,
        app: &Application,
        host: &SshHost,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<u16, PortsideError> {
        host.validate()?;
        let instance = self.ledger.instance_for(app.id, host.id).await?;
        let port = instance.active_port.ok_or_else(|| {
            PortsideError::DeployError(format!(
                "{} on {} has never been deployed; nothing to restart",
                app.name, host.name
            ))
        })?;

        let runner = self.connector.connect(host).await?;
        let controller = ProcessController::new(runner.clone());
        let result = async {
            controller
                .restart(&app.name, port, self.settings.restart_pause(), &self.sleep_fn)
                .await?;
            let health =
                HealthMonitor::new(self.settings.health.retry_policy(), self.sleep_fn.clone());
            health
                .wait_until_active(runner.as_ref(), &app.name, port, cancel)
                .await
        }
        .await;

        if let Err(e) = result {
            // Connection loss leaves the unit state unknown; everything
            // else means the unit did not come back up.
            if !e.is_connection() {
                let _ = self
                    .ledger
                    .set_instance_status(instance.id, InstanceStatus::Failed)
                    .await;
            }
            return Err(e);
        }

        self.ledger
            .set_instance_status(instance.id, InstanceStatus::Running)
            .await?;
        info!("Restarted {} on port {}", unit_name(&app.name, port), port);
        Ok(port)
    }

    /// Stop the unit on the active port. The port assignment is kept so
    /// a later restart brings the same release back.
    pub async fn stop(&self, app: &Application, host: &SshHost) -> Result<u16, PortsideError> {
        host.validate()?;
        let instance = self.ledger.instance_for(app.id, host.id).await?;
        let port = instance.active_port.ok_or_else(|| {
            PortsideError::DeployError(format!(
                "{} on {} has never been deployed; nothing to stop",
                app.name, host.name
            ))
        })?;

        let runner = self.connector.connect(host).await?;
        let controller = ProcessController::new(runner);
        controller.stop(&app.name, port).await?;

        if let Some(row) = self.ledger.deployment_on_port(instance.id, port).await? {
            self.ledger
                .mark_deployment(row.id, DeploymentStatus::Stopped)
                .await?;
        }
        self.ledger
            .set_instance_status(instance.id, InstanceStatus::Stopped)
            .await?;
        info!("Stopped {}", unit_name(&app.name, port));
        Ok(port)
    }

    /// Status query: ledger state, the rollback candidate, recent audit
    /// rows, and (when the host answers) the live unit state.
    pub async fn status(
        &self,
        app: &Application,
        host: &SshHost,
    ) -> Result<StatusReport, PortsideError> {
        let instance = self.ledger.instance_for(app.id, host.id).await?;
        let recent = self.history.entries_for(instance.id).await?;

        let unit_state = match instance.active_port {
            Some(port) => match self.connector.connect(host).await {
                Ok(runner) => {
                    let command = format!("systemctl is-active {}", unit_name(&app.name, port));
                    match runner.exec(&command).await {
                        Ok(output) => Some(output.output.trim().to_string()),
                        Err(_) => None,
                    }
                }
                Err(e) => {
                    warn!("Status check for {} unreachable: {}", host.name, e);
                    None
                }
            },
            None => None,
        };

        Ok(StatusReport {
            instance,
            unit_state,
            recent,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        app: &Application,
        host: &SshHost,
        domains: &[Domain],
        instance: &ApplicationInstance,
        artifact: &BuildArtifact,
        release: &Release,
        fsm: &mut AttemptFsm,
        log: &mut AttemptLog,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<PromotionOutcome, PortsideError> {
        fsm.process(AttemptEvent::Resolve)
            .map_err(PortsideError::DeployError)?;
        log.push(format!("artifact {} ({})", artifact.md5_hash, artifact.id));

        let runner = self.connector.connect(host).await?;

        let staged = self
            .ledger
            .stage_deployment(
                instance.id,
                &self.settings.port_policy,
                &release.version,
                release
                    .git_commit_sha
                    .clone()
                    .or_else(|| artifact.git_commit_sha.clone()),
                &artifact.local_path,
            )
            .await?;
        log.push(format!(
            "active port {:?}, standby port {}",
            staged.active_port, staged.standby_port
        ));

        let controller = ProcessController::new(runner.clone());
        match controller.start(&app.name, staged.standby_port).await {
            Ok(output) => log.push_remote(
                &format!("start {}", unit_name(&app.name, staged.standby_port)),
                &output.output,
            ),
            Err(e) => {
                let _ = self
                    .ledger
                    .mark_deployment(staged.deployment_id, DeploymentStatus::Failed)
                    .await;
                if staged.active_port.is_none() {
                    let _ = self
                        .ledger
                        .set_instance_status(instance.id, InstanceStatus::Failed)
                        .await;
                }
                return Err(e);
            }
        }
        fsm.process(AttemptEvent::Start)
            .map_err(PortsideError::DeployError)?;
        self.ledger
            .mark_deployment(staged.deployment_id, DeploymentStatus::Running)
            .await?;

        fsm.process(AttemptEvent::Check)
            .map_err(PortsideError::DeployError)?;
        let health = HealthMonitor::new(self.settings.health.retry_policy(), self.sleep_fn.clone());
        let health_attempts = match health
            .wait_until_active(runner.as_ref(), &app.name, staged.standby_port, cancel)
            .await
        {
            Ok(attempts) => {
                log.push(format!(
                    "health check passed after {} attempt(s)",
                    attempts
                ));
                attempts
            }
            Err(e) if e.is_connection() => {
                // Host went away mid-check: nothing more can be done
                // remotely; the row is failed so GC picks it up later.
                let _ = self
                    .ledger
                    .mark_deployment(staged.deployment_id, DeploymentStatus::Failed)
                    .await;
                return Err(e);
            }
            Err(e) => {
                self.roll_back(&controller, app, instance, &staged, &e.to_string(), fsm, log)
                    .await;
                return Err(e);
            }
        };

        // Zero-downtime cutover: proxy first, ledger second, and neither
        // before the health pass above.
        let hostnames: Vec<String> = domains.iter().map(|d| d.hostname.clone()).collect();
        if let Err(e) = self.sync_proxy(&hostnames, staged.standby_port).await {
            // A multi-domain write may have flipped some routes before
            // failing; point them back at the old release before the
            // standby is stopped. Never report success with an
            // unsynchronized proxy.
            self.revert_routes(&hostnames, staged.active_port, log).await;
            self.roll_back(&controller, app, instance, &staged, &e.to_string(), fsm, log)
                .await;
            return Err(e);
        }
        log.push(format!(
            "proxy routes {:?} -> localhost:{}",
            hostnames, staged.standby_port
        ));

        let updated = match self
            .ledger
            .transition_ports(instance.id, staged.standby_port)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                // Proxy already points at the standby; point it back at
                // the old release before stopping the standby unit.
                self.revert_routes(&hostnames, staged.active_port, log).await;
                self.roll_back(&controller, app, instance, &staged, &e.to_string(), fsm, log)
                    .await;
                return Err(e);
            }
        };
        fsm.process(AttemptEvent::Promote)
            .map_err(PortsideError::DeployError)?;
        log.push(format!(
            "promoted: active {} previous {:?}",
            staged.standby_port, updated.previous_active_port
        ));

        // Reclamation failures never fail a promoted deployment.
        let gc = GarbageCollector::new(
            self.ledger.clone(),
            self.history.clone(),
            self.settings.keep_releases,
            self.settings.keep_history,
        );
        match gc.collect(&runner, app, &updated).await {
            Ok(reclaimed) if reclaimed > 0 => {
                log.push(format!("reclaimed {} stale instance(s)", reclaimed));
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Garbage collection after promotion failed: {}", e);
                log.push(format!("gc failed: {}", e));
            }
        }

        Ok(PromotionOutcome {
            instance: updated,
            port: staged.standby_port,
            health_attempts,
        })
    }

    async fn sync_proxy(&self, hostnames: &[String], port: u16) -> Result<(), PortsideError> {
        if hostnames.is_empty() {
            return Ok(());
        }
        self.routes.ensure_base_structure().await?;
        self.routes.set_routes(hostnames, port).await
    }

    /// Point the routes back at the old release after a failed cutover.
    /// On a first deploy there is no old port, so any flipped routes are
    /// cleared instead; a domain must never route to a stopped unit.
    async fn revert_routes(
        &self,
        hostnames: &[String],
        old_port: Option<u16>,
        log: &mut AttemptLog,
    ) {
        let result = match old_port {
            Some(port) => self.routes.set_routes(hostnames, port).await,
            None => {
                let mut result = Ok(());
                for domain in hostnames {
                    if let Err(e) = self.routes.delete_route(domain).await {
                        result = Err(e);
                        break;
                    }
                }
                result
            }
        };
        if let Err(e) = result {
            error!("Failed to revert proxy routes: {}", e);
            log.push(format!("proxy revert failed: {}", e));
        }
    }

    /// Stop the standby and mark its row failed. The active port keeps
    /// serving; the proxy has either not been touched or been reverted.
    async fn roll_back(
        &self,
        controller: &ProcessController,
        app: &Application,
        instance: &ApplicationInstance,
        staged: &StagedDeployment,
        reason: &str,
        fsm: &mut AttemptFsm,
        log: &mut AttemptLog,
    ) {
        warn!(
            "Rolling back {} on port {}: {}",
            app.name, staged.standby_port, reason
        );
        log.push(format!(
            "rolling back port {}: {}",
            staged.standby_port, reason
        ));

        match controller.stop(&app.name, staged.standby_port).await {
            Ok(_) => log.push(format!(
                "stopped {}",
                unit_name(&app.name, staged.standby_port)
            )),
            Err(e) => {
                warn!("Stopping standby during rollback: {}", e);
                log.push(format!("stopping standby failed: {}", e));
            }
        }

        let _ = self
            .ledger
            .mark_deployment(staged.deployment_id, DeploymentStatus::Failed)
            .await;
        if staged.active_port.is_none() {
            let _ = self
                .ledger
                .set_instance_status(instance.id, InstanceStatus::Failed)
                .await;
        }
        let _ = fsm.process(AttemptEvent::RollBack(reason.to_string()));
    }
}

struct PromotionOutcome {
    instance: ApplicationInstance,
    port: u16,
    health_attempts: u32,
}
