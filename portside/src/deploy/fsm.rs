//! Finite state machine for one deployment attempt

use serde::{Deserialize, Serialize};

/// State of a deployment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Attempt recorded, nothing resolved yet
    Queued,

    /// Build artifact found in the registry
    ArtifactResolved,

    /// Standby unit start issued
    Started,

    /// Health monitor polling the standby port
    HealthChecking,

    /// Proxy flipped and ledger ports transitioned
    Promoted,

    /// Standby stopped, active port untouched
    RolledBack,

    /// Audit row finalized; terminal either way
    Recorded,
}

/// Attempt event
#[derive(Debug, Clone)]
pub enum AttemptEvent {
    /// Artifact lookup succeeded
    Resolve,

    /// Standby unit started
    Start,

    /// Health polling began
    Check,

    /// Health passed, proxy synced, ledger transitioned
    Promote,

    /// Attempt failed after the standby was started
    RollBack(String),

    /// Audit row finalized
    Record,
}

/// Per-attempt FSM.
///
/// The transition table is the ordering guarantee of the deployment:
/// `Promote` is only reachable from `HealthChecking`, so the proxy can
/// never be flipped before a health pass.
#[derive(Debug, Clone)]
pub struct AttemptFsm {
    state: AttemptState,
    error: Option<String>,
}

impl AttemptFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self {
            state: AttemptState::Queued,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the attempt reached a terminal record
    pub fn is_recorded(&self) -> bool {
        self.state == AttemptState::Recorded
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: AttemptEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (AttemptState::Queued, AttemptEvent::Resolve) => AttemptState::ArtifactResolved,

            (AttemptState::ArtifactResolved, AttemptEvent::Start) => AttemptState::Started,

            (AttemptState::Started, AttemptEvent::Check) => AttemptState::HealthChecking,
            (AttemptState::Started, AttemptEvent::RollBack(err)) => {
                self.error = Some(err.clone());
                AttemptState::RolledBack
            }

            (AttemptState::HealthChecking, AttemptEvent::Promote) => AttemptState::Promoted,
            (AttemptState::HealthChecking, AttemptEvent::RollBack(err)) => {
                self.error = Some(err.clone());
                AttemptState::RolledBack
            }

            (AttemptState::Promoted, AttemptEvent::Record) => AttemptState::Recorded,
            (AttemptState::RolledBack, AttemptEvent::Record) => AttemptState::Recorded,

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for AttemptFsm {
    fn default() -> Self {
        Self::new()
    }
}
