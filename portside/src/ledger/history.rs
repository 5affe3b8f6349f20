//! Deployment audit trail

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::PortsideError;
use crate::ledger::store::LedgerStore;
use crate::models::deployment::{DeploymentHistory, HistoryStatus};

/// Writes and finalizes audit rows for deployment attempts.
///
/// The `pending` row created by `begin` is also the advisory deployment
/// lock: it is persisted state, so it serializes attempts across process
/// restarts and across multiple orchestrator instances sharing the store.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<LedgerStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a `pending` audit row for a new attempt.
    ///
    /// Fails with `ConcurrencyConflict` if a pending row already exists
    /// for the instance; the caller has made no remote side effect yet.
    pub async fn begin(
        &self,
        instance_id: Uuid,
        version: &str,
        release_path: &str,
    ) -> Result<Uuid, PortsideError> {
        let version = version.to_string();
        let release_path = release_path.to_string();

        self.store
            .mutate(move |state| {
                if let Some(pending) = state
                    .history
                    .iter()
                    .find(|h| h.instance_id == instance_id && h.status == HistoryStatus::Pending)
                {
                    return Err(PortsideError::ConcurrencyConflict(format!(
                        "deployment {} already pending for instance {}",
                        pending.id, instance_id
                    )));
                }

                let row = DeploymentHistory {
                    id: Uuid::new_v4(),
                    instance_id,
                    version,
                    release_path,
                    status: HistoryStatus::Pending,
                    log_output: String::new(),
                    port: None,
                    created_at: Utc::now(),
                    deployed_at: None,
                };
                let id = row.id;
                state.history.push(row);
                Ok(id)
            })
            .await
    }

    /// Finalize an attempt exactly once.
    ///
    /// `deployed_at` and `port` are stamped only on success.
    pub async fn finish(
        &self,
        history_id: Uuid,
        status: HistoryStatus,
        log_output: &str,
        port: Option<u16>,
    ) -> Result<(), PortsideError> {
        if status == HistoryStatus::Pending {
            return Err(PortsideError::Ledger(
                "finish requires a terminal status".to_string(),
            ));
        }
        let log_output = log_output.to_string();

        self.store
            .mutate(move |state| {
                let row = state
                    .history
                    .iter_mut()
                    .find(|h| h.id == history_id)
                    .ok_or_else(|| {
                        PortsideError::Ledger(format!("unknown history row {}", history_id))
                    })?;

                if row.status != HistoryStatus::Pending {
                    return Err(PortsideError::Ledger(format!(
                        "history row {} already finalized as {:?}",
                        history_id, row.status
                    )));
                }

                row.status = status;
                row.log_output = log_output;
                if status == HistoryStatus::Success {
                    row.deployed_at = Some(Utc::now());
                    row.port = port;
                }
                Ok(())
            })
            .await
    }

    /// Mark crash-orphaned pending rows as failed.
    ///
    /// Only rows older than `older_than` are touched, so a live attempt's
    /// freshly created row is never reclaimed out from under it.
    pub async fn abandon_pending(
        &self,
        instance_id: Uuid,
        older_than: Duration,
    ) -> Result<usize, PortsideError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| PortsideError::ConfigError(e.to_string()))?;

        self.store
            .mutate(move |state| {
                let mut abandoned = 0;
                for row in state.history.iter_mut().filter(|h| {
                    h.instance_id == instance_id
                        && h.status == HistoryStatus::Pending
                        && h.created_at < cutoff
                }) {
                    row.status = HistoryStatus::Failed;
                    if !row.log_output.is_empty() {
                        row.log_output.push('\n');
                    }
                    row.log_output
                        .push_str("abandoned: no orchestrator finalized this attempt");
                    abandoned += 1;
                }
                Ok(abandoned)
            })
            .await
    }

    /// The pending row for an instance, if one exists.
    pub async fn pending(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<DeploymentHistory>, PortsideError> {
        Ok(self
            .store
            .read(move |state| {
                state
                    .history
                    .iter()
                    .find(|h| h.instance_id == instance_id && h.status == HistoryStatus::Pending)
                    .cloned()
            })
            .await)
    }

    pub async fn entry(&self, history_id: Uuid) -> Result<DeploymentHistory, PortsideError> {
        self.store
            .read(move |state| state.history.iter().find(|h| h.id == history_id).cloned())
            .await
            .ok_or_else(|| PortsideError::Ledger(format!("unknown history row {}", history_id)))
    }

    /// Audit rows for an instance, newest first.
    pub async fn entries_for(
        &self,
        instance_id: Uuid,
    ) -> Result<Vec<DeploymentHistory>, PortsideError> {
        Ok(self
            .store
            .read(move |state| {
                let mut rows: Vec<_> = state
                    .history
                    .iter()
                    .filter(|h| h.instance_id == instance_id)
                    .cloned()
                    .collect();
                rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                rows
            })
            .await)
    }

    /// Drop terminal rows beyond the newest `keep`. Pending rows are
    /// never pruned.
    pub async fn prune(
        &self,
        instance_id: Uuid,
        keep: usize,
    ) -> Result<usize, PortsideError> {
        self.store
            .mutate(move |state| {
                let mut terminal: Vec<(Uuid, chrono::DateTime<Utc>)> = state
                    .history
                    .iter()
                    .filter(|h| {
                        h.instance_id == instance_id && h.status != HistoryStatus::Pending
                    })
                    .map(|h| (h.id, h.created_at))
                    .collect();
                terminal.sort_by(|a, b| b.1.cmp(&a.1));

                let doomed: Vec<Uuid> =
                    terminal.into_iter().skip(keep).map(|(id, _)| id).collect();
                let removed = doomed.len();
                state.history.retain(|h| !doomed.contains(&h.id));
                Ok(removed)
            })
            .await
    }
}
