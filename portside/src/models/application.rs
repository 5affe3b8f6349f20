//! Application and application-instance models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A logical deployable unit. Registered once; immutable except rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Unique application ID
    pub id: Uuid,

    /// Application name, also the systemd template-unit prefix
    pub name: String,
}

/// Lifecycle status of an application instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Registered but never deployed
    Pending,

    /// Serving traffic on the active port
    Running,

    /// Explicitly stopped by an operator
    Stopped,

    /// Last deployment attempt failed; previous release may still serve
    Failed,
}

/// Binds one Application to one SSH host.
///
/// `active_port` and `previous_active_port`, when both set, are never
/// equal. Mutated exclusively by the orchestrator inside a single ledger
/// transaction per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationInstance {
    /// Unique instance ID
    pub id: Uuid,

    /// Application this instance belongs to
    pub application_id: Uuid,

    /// Host this instance runs on
    pub host_id: Uuid,

    /// Current status
    pub status: InstanceStatus,

    /// Port currently receiving traffic; unset before the first deploy
    pub active_port: Option<u16>,

    /// Port of the superseded release, retained as the rollback candidate
    pub previous_active_port: Option<u16>,
}

impl ApplicationInstance {
    pub fn new(application_id: Uuid, host_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            host_id,
            status: InstanceStatus::Pending,
            active_port: None,
            previous_active_port: None,
        }
    }
}

/// A hostname routed to an application instance by the reverse proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    /// Unique domain ID
    pub id: Uuid,

    /// Instance the hostname routes to
    pub instance_id: Uuid,

    /// Fully qualified hostname
    pub hostname: String,

    /// Whether this is the primary hostname for the instance
    pub is_primary: bool,
}
