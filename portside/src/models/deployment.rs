//! Deployment instance and audit-trail models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime status of a deployment instance on one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Unit stopped, port free
    Stopped,

    /// Unit start issued, health not yet confirmed
    Starting,

    /// Unit running, not yet promoted
    Running,

    /// Serving traffic through the proxy
    Active,

    /// Superseded release still running on its old port
    Standby,

    /// Failed to start or failed its health check
    Failed,
}

/// One (application instance, port) occupation.
///
/// Multiple historical rows may exist for the same port over time; only
/// the most recent row per port is operationally relevant. Status
/// transitions are driven solely by the orchestrator and the garbage
/// collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInstance {
    /// Unique row ID
    pub id: Uuid,

    /// Application instance this row belongs to
    pub instance_id: Uuid,

    /// Release version
    pub version: String,

    /// Git commit the release was built from
    pub git_commit_sha: Option<String>,

    /// Remote path of the release directory
    pub release_path: String,

    /// Port the unit is bound to
    pub port: u16,

    /// Current status
    pub status: DeploymentStatus,

    /// When the unit was started
    pub started_at: Option<DateTime<Utc>>,

    /// When the unit was stopped
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Terminal-or-pending status of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Pending,
    Success,
    Failed,
}

/// Append-only audit row for one deployment attempt.
///
/// Created `pending` before any remote side effect, finalized exactly
/// once. At most one pending row exists per application instance at any
/// time; the pending row doubles as the cross-process deployment lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistory {
    /// Unique attempt ID
    pub id: Uuid,

    /// Application instance the attempt targeted
    pub instance_id: Uuid,

    /// Release version
    pub version: String,

    /// Remote path of the release directory
    pub release_path: String,

    /// Attempt status
    pub status: HistoryStatus,

    /// Captured output of every remote call made during the attempt
    pub log_output: String,

    /// Port the release was promoted to; stamped only on success
    pub port: Option<u16>,

    /// When the attempt was created
    pub created_at: DateTime<Utc>,

    /// When the release went live; stamped only on success
    pub deployed_at: Option<DateTime<Utc>>,
}
