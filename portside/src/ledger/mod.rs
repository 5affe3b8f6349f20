//! Instance ledger: authoritative port state and deployment rows

pub mod artifacts;
pub mod history;
pub mod store;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PortsideError;
use crate::models::application::{ApplicationInstance, InstanceStatus};
use crate::models::deployment::{DeploymentInstance, DeploymentStatus};
use store::LedgerStore;

/// How the standby port is chosen relative to the active port.
///
/// An explicit configuration choice: either alternate between two
/// well-known ports, or allocate the first free port from a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PortPolicy {
    /// Alternate between two fixed ports
    TwoPort { blue: u16, green: u16 },

    /// First port in the range that is neither active nor occupied
    Range { start: u16, end: u16 },
}

impl Default for PortPolicy {
    fn default() -> Self {
        PortPolicy::TwoPort {
            blue: 4000,
            green: 4001,
        }
    }
}

impl PortPolicy {
    /// Pick the standby port. Never returns the active port.
    pub fn standby_for(
        &self,
        active: Option<u16>,
        occupied: &[u16],
    ) -> Result<u16, PortsideError> {
        match self {
            PortPolicy::TwoPort { blue, green } => match active {
                Some(port) if port == *blue => Ok(*green),
                Some(_) => Ok(*blue),
                None => Ok(*blue),
            },
            PortPolicy::Range { start, end } => (*start..=*end)
                .find(|p| Some(*p) != active && !occupied.contains(p))
                .ok_or_else(|| {
                    PortsideError::Ledger(format!(
                        "no free port in range {}..={}",
                        start, end
                    ))
                }),
        }
    }
}

/// Result of staging a deployment: the transactional read of the active
/// port, the computed standby, and the freshly inserted `starting` row.
#[derive(Debug, Clone)]
pub struct StagedDeployment {
    pub deployment_id: Uuid,
    pub active_port: Option<u16>,
    pub standby_port: u16,
}

/// Ledger of application instances and their per-port deployment rows.
#[derive(Clone)]
pub struct InstanceLedger {
    store: Arc<LedgerStore>,
}

impl InstanceLedger {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Find or create the instance binding an application to a host.
    pub async fn instance_for(
        &self,
        application_id: Uuid,
        host_id: Uuid,
    ) -> Result<ApplicationInstance, PortsideError> {
        let existing = self
            .store
            .read(|state| {
                state
                    .instances
                    .iter()
                    .find(|i| i.application_id == application_id && i.host_id == host_id)
                    .cloned()
            })
            .await;

        if let Some(instance) = existing {
            return Ok(instance);
        }

        self.store
            .mutate(|state| {
                let instance = ApplicationInstance::new(application_id, host_id);
                state.instances.push(instance.clone());
                Ok(instance)
            })
            .await
    }

    pub async fn get(&self, instance_id: Uuid) -> Result<ApplicationInstance, PortsideError> {
        self.store
            .read(|state| state.instances.iter().find(|i| i.id == instance_id).cloned())
            .await
            .ok_or_else(|| PortsideError::Ledger(format!("unknown instance {}", instance_id)))
    }

    pub async fn active_port(&self, instance_id: Uuid) -> Result<Option<u16>, PortsideError> {
        Ok(self.get(instance_id).await?.active_port)
    }

    /// Stage a deployment in one transaction: read the active port,
    /// compute the standby port, and insert the `starting` row. Running
    /// this under a single write lock is what prevents two concurrent
    /// attempts from computing the same standby port.
    pub async fn stage_deployment(
        &self,
        instance_id: Uuid,
        policy: &PortPolicy,
        version: &str,
        git_commit_sha: Option<String>,
        release_path: &str,
    ) -> Result<StagedDeployment, PortsideError> {
        let version = version.to_string();
        let release_path = release_path.to_string();
        let policy = policy.clone();

        self.store
            .mutate(move |state| {
                let instance = state
                    .instances
                    .iter()
                    .find(|i| i.id == instance_id)
                    .ok_or_else(|| {
                        PortsideError::Ledger(format!("unknown instance {}", instance_id))
                    })?;

                let active = instance.active_port;
                let occupied: Vec<u16> = state
                    .deployments
                    .iter()
                    .filter(|d| {
                        d.instance_id == instance_id
                            && !matches!(
                                d.status,
                                DeploymentStatus::Stopped | DeploymentStatus::Failed
                            )
                    })
                    .map(|d| d.port)
                    .collect();

                let standby_port = policy.standby_for(active, &occupied)?;

                let row = DeploymentInstance {
                    id: Uuid::new_v4(),
                    instance_id,
                    version,
                    git_commit_sha,
                    release_path,
                    port: standby_port,
                    status: DeploymentStatus::Starting,
                    started_at: Some(Utc::now()),
                    stopped_at: None,
                };
                let deployment_id = row.id;
                state.deployments.push(row);

                Ok(StagedDeployment {
                    deployment_id,
                    active_port: active,
                    standby_port,
                })
            })
            .await
    }

    /// Set a deployment row's status, stamping `stopped_at` when the row
    /// reaches a stopped or failed state.
    pub async fn mark_deployment(
        &self,
        deployment_id: Uuid,
        status: DeploymentStatus,
    ) -> Result<(), PortsideError> {
        self.store
            .mutate(move |state| {
                let row = state
                    .deployments
                    .iter_mut()
                    .find(|d| d.id == deployment_id)
                    .ok_or_else(|| {
                        PortsideError::Ledger(format!("unknown deployment {}", deployment_id))
                    })?;
                row.status = status;
                if matches!(status, DeploymentStatus::Stopped | DeploymentStatus::Failed) {
                    row.stopped_at = Some(Utc::now());
                }
                Ok(())
            })
            .await
    }

    /// Atomically shift `active -> previous` and promote the new port,
    /// flipping the affected deployment rows to `active`/`standby`.
    ///
    /// Rejects a no-op transition: the new active port must differ from
    /// the current one, preserving the two-field distinctness invariant.
    pub async fn transition_ports(
        &self,
        instance_id: Uuid,
        new_active: u16,
    ) -> Result<ApplicationInstance, PortsideError> {
        self.store
            .mutate(move |state| {
                let instance = state
                    .instances
                    .iter_mut()
                    .find(|i| i.id == instance_id)
                    .ok_or_else(|| {
                        PortsideError::Ledger(format!("unknown instance {}", instance_id))
                    })?;

                if instance.active_port == Some(new_active) {
                    return Err(PortsideError::Ledger(format!(
                        "port {} is already active for instance {}",
                        new_active, instance_id
                    )));
                }

                let previous = instance.active_port;
                instance.previous_active_port = previous;
                instance.active_port = Some(new_active);
                instance.status = InstanceStatus::Running;
                let updated = instance.clone();

                for row in state
                    .deployments
                    .iter_mut()
                    .filter(|d| d.instance_id == instance_id)
                {
                    if row.port == new_active
                        && matches!(
                            row.status,
                            DeploymentStatus::Starting | DeploymentStatus::Running
                        )
                    {
                        row.status = DeploymentStatus::Active;
                    } else if Some(row.port) == previous
                        && row.status == DeploymentStatus::Active
                    {
                        row.status = DeploymentStatus::Standby;
                    }
                }

                Ok(updated)
            })
            .await
    }

    /// Deployment rows occupying a port that is neither `active` nor
    /// `standby` and whose status is not already stopped or failed.
    pub async fn find_stale(
        &self,
        instance_id: Uuid,
        active: u16,
        standby: u16,
    ) -> Result<Vec<DeploymentInstance>, PortsideError> {
        Ok(self
            .store
            .read(move |state| {
                state
                    .deployments
                    .iter()
                    .filter(|d| {
                        d.instance_id == instance_id
                            && d.port != active
                            && d.port != standby
                            && !matches!(
                                d.status,
                                DeploymentStatus::Stopped | DeploymentStatus::Failed
                            )
                    })
                    .cloned()
                    .collect()
            })
            .await)
    }

    /// All deployment rows for an instance, newest first.
    pub async fn deployments_for(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<DeploymentInstance>, PortsideError> {
        Ok(self
            .store
            .read(move |state| {
                let mut rows: Vec<_> = state
                    .deployments
                    .iter()
                    .filter(|d| d.instance_id == instance_id)
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
                rows
            })
            .await)
    }

    /// Most recent row occupying the given port, if any.
    pub async fn deployment_on_port(
        &self,
        instance_id: Uuid,
        port: u16,
    ) -> Result<Option<DeploymentInstance>, PortsideError> {
        Ok(self
            .deployments_for(instance_id)
            .await?
            .into_iter()
            .find(|d| d.port == port))
    }

    pub async fn set_instance_status(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
    ) -> Result<(), PortsideError> {
        self.store
            .mutate(move |state| {
                let instance = state
                    .instances
                    .iter_mut()
                    .find(|i| i.id == instance_id)
                    .ok_or_else(|| {
                        PortsideError::Ledger(format!("unknown instance {}", instance_id))
                    })?;
                instance.status = status;
                Ok(())
            })
            .await
    }
}
