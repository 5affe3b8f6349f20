//! Ledger, history, and artifact registry tests

use std::time::Duration;

use uuid::Uuid;

use portside::errors::PortsideError;
use portside::ledger::artifacts::ArtifactStore;
use portside::models::artifact::BuildArtifact;
use portside::ledger::history::HistoryRecorder;
use portside::ledger::store::LedgerStore;
use portside::ledger::{InstanceLedger, PortPolicy};
use portside::models::deployment::{DeploymentStatus, HistoryStatus};
use portside::models::release::Release;

#[test]
fn test_two_port_alternation() {
    let policy = PortPolicy::default();
    assert_eq!(policy.standby_for(None, &[]).unwrap(), 4000);
    assert_eq!(policy.standby_for(Some(4000), &[]).unwrap(), 4001);
    assert_eq!(policy.standby_for(Some(4001), &[]).unwrap(), 4000);
}

#[test]
fn test_range_policy_skips_occupied() {
    let policy = PortPolicy::Range {
        start: 5000,
        end: 5002,
    };
    assert_eq!(policy.standby_for(Some(5000), &[5001]).unwrap(), 5002);
    assert!(matches!(
        policy.standby_for(Some(5000), &[5001, 5002]),
        Err(PortsideError::Ledger(_))
    ));
}

#[tokio::test]
async fn test_stage_and_transition_alternates_ports() {
    let store = LedgerStore::ephemeral();
    let ledger = InstanceLedger::new(store);
    let policy = PortPolicy::default();

    let instance = ledger
        .instance_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(instance.active_port, None);

    let first = ledger
        .stage_deployment(instance.id, &policy, "1.0.0", None, "/srv/releases/1.0.0")
        .await
        .unwrap();
    assert_eq!(first.active_port, None);
    assert_eq!(first.standby_port, 4000);

    let updated = ledger.transition_ports(instance.id, 4000).await.unwrap();
    assert_eq!(updated.active_port, Some(4000));
    assert_eq!(updated.previous_active_port, None);

    let second = ledger
        .stage_deployment(instance.id, &policy, "1.1.0", None, "/srv/releases/1.1.0")
        .await
        .unwrap();
    assert_eq!(second.active_port, Some(4000));
    assert_eq!(second.standby_port, 4001);

    let updated = ledger.transition_ports(instance.id, 4001).await.unwrap();
    assert_eq!(updated.active_port, Some(4001));
    assert_eq!(updated.previous_active_port, Some(4000));
    assert_ne!(updated.active_port, updated.previous_active_port);
}

#[tokio::test]
async fn test_transition_rejects_noop() {
    let store = LedgerStore::ephemeral();
    let ledger = InstanceLedger::new(store);
    let instance = ledger
        .instance_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    ledger.transition_ports(instance.id, 4000).await.unwrap();
    assert!(ledger.transition_ports(instance.id, 4000).await.is_err());
}

#[tokio::test]
async fn test_transition_flips_deployment_rows() {
    let store = LedgerStore::ephemeral();
    let ledger = InstanceLedger::new(store);
    let policy = PortPolicy::default();
    let instance = ledger
        .instance_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    let first = ledger
        .stage_deployment(instance.id, &policy, "1.0.0", None, "/srv/releases/1.0.0")
        .await
        .unwrap();
    ledger
        .mark_deployment(first.deployment_id, DeploymentStatus::Running)
        .await
        .unwrap();
    ledger.transition_ports(instance.id, 4000).await.unwrap();

    let second = ledger
        .stage_deployment(instance.id, &policy, "1.1.0", None, "/srv/releases/1.1.0")
        .await
        .unwrap();
    ledger
        .mark_deployment(second.deployment_id, DeploymentStatus::Running)
        .await
        .unwrap();
    ledger.transition_ports(instance.id, 4001).await.unwrap();

    let rows = ledger.deployments_for(instance.id).await.unwrap();
    let on_4001 = rows.iter().find(|r| r.port == 4001).unwrap();
    let on_4000 = rows.iter().find(|r| r.port == 4000).unwrap();
    assert_eq!(on_4001.status, DeploymentStatus::Active);
    assert_eq!(on_4000.status, DeploymentStatus::Standby);
}

#[tokio::test]
async fn test_find_stale_protects_active_and_standby() {
    let store = LedgerStore::ephemeral();
    let ledger = InstanceLedger::new(store);
    let policy = PortPolicy::Range {
        start: 5000,
        end: 5010,
    };
    let instance = ledger
        .instance_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    // Three live rows on 5000..5002; active is 5002, standby 5001.
    for (version, port) in [("1.0.0", 5000), ("1.1.0", 5001), ("1.2.0", 5002)] {
        let staged = ledger
            .stage_deployment(instance.id, &policy, version, None, "/srv/releases/x")
            .await
            .unwrap();
        assert_eq!(staged.standby_port, port);
        ledger.transition_ports(instance.id, port).await.unwrap();
    }

    let stale = ledger.find_stale(instance.id, 5002, 5001).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].port, 5000);

    ledger
        .mark_deployment(stale[0].id, DeploymentStatus::Stopped)
        .await
        .unwrap();
    let stale = ledger.find_stale(instance.id, 5002, 5001).await.unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn test_mark_deployment_stamps_stopped_at() {
    let store = LedgerStore::ephemeral();
    let ledger = InstanceLedger::new(store);
    let instance = ledger
        .instance_for(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    let staged = ledger
        .stage_deployment(
            instance.id,
            &PortPolicy::default(),
            "1.0.0",
            None,
            "/srv/releases/1.0.0",
        )
        .await
        .unwrap();

    ledger
        .mark_deployment(staged.deployment_id, DeploymentStatus::Failed)
        .await
        .unwrap();
    let rows = ledger.deployments_for(instance.id).await.unwrap();
    assert!(rows[0].stopped_at.is_some());
}

#[tokio::test]
async fn test_history_at_most_one_pending() {
    let store = LedgerStore::ephemeral();
    let history = HistoryRecorder::new(store);
    let instance_id = Uuid::new_v4();

    let first = history
        .begin(instance_id, "1.0.0", "/srv/releases/1.0.0")
        .await
        .unwrap();
    assert!(matches!(
        history.begin(instance_id, "1.0.1", "/srv/releases/1.0.1").await,
        Err(PortsideError::ConcurrencyConflict(_))
    ));

    history
        .finish(first, HistoryStatus::Success, "ok", Some(4000))
        .await
        .unwrap();
    history
        .begin(instance_id, "1.0.1", "/srv/releases/1.0.1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_history_finish_is_exactly_once() {
    let store = LedgerStore::ephemeral();
    let history = HistoryRecorder::new(store);
    let id = history
        .begin(Uuid::new_v4(), "1.0.0", "/srv/releases/1.0.0")
        .await
        .unwrap();

    assert!(history
        .finish(id, HistoryStatus::Pending, "", None)
        .await
        .is_err());

    history
        .finish(id, HistoryStatus::Failed, "health check exhausted", None)
        .await
        .unwrap();
    assert!(history
        .finish(id, HistoryStatus::Success, "ok", Some(4000))
        .await
        .is_err());

    let row = history.entry(id).await.unwrap();
    assert_eq!(row.status, HistoryStatus::Failed);
    assert_eq!(row.port, None);
    assert!(row.deployed_at.is_none());
}

#[tokio::test]
async fn test_history_success_stamps_port_and_time() {
    let store = LedgerStore::ephemeral();
    let history = HistoryRecorder::new(store);
    let id = history
        .begin(Uuid::new_v4(), "1.0.0", "/srv/releases/1.0.0")
        .await
        .unwrap();
    history
        .finish(id, HistoryStatus::Success, "ok", Some(4001))
        .await
        .unwrap();

    let row = history.entry(id).await.unwrap();
    assert_eq!(row.port, Some(4001));
    assert!(row.deployed_at.is_some());
}

#[tokio::test]
async fn test_abandon_pending_respects_age() {
    let store = LedgerStore::ephemeral();
    let history = HistoryRecorder::new(store);
    let instance_id = Uuid::new_v4();

    history
        .begin(instance_id, "1.0.0", "/srv/releases/1.0.0")
        .await
        .unwrap();

    // A fresh row survives a ten-minute threshold.
    let abandoned = history
        .abandon_pending(instance_id, Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(abandoned, 0);
    assert!(history.pending(instance_id).await.unwrap().is_some());

    // With a zero threshold the same row counts as orphaned.
    let abandoned = history
        .abandon_pending(instance_id, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(abandoned, 1);
    assert!(history.pending(instance_id).await.unwrap().is_none());

    let rows = history.entries_for(instance_id).await.unwrap();
    assert_eq!(rows[0].status, HistoryStatus::Failed);
    assert!(rows[0].log_output.contains("abandoned"));
}

#[tokio::test]
async fn test_history_prune_keeps_pending() {
    let store = LedgerStore::ephemeral();
    let history = HistoryRecorder::new(store);
    let instance_id = Uuid::new_v4();

    for i in 0..5 {
        let id = history
            .begin(instance_id, &format!("1.0.{}", i), "/srv/releases/x")
            .await
            .unwrap();
        history
            .finish(id, HistoryStatus::Success, "ok", Some(4000))
            .await
            .unwrap();
    }
    history
        .begin(instance_id, "1.0.5", "/srv/releases/x")
        .await
        .unwrap();

    let removed = history.prune(instance_id, 2).await.unwrap();
    assert_eq!(removed, 3);

    let rows = history.entries_for(instance_id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().any(|r| r.status == HistoryStatus::Pending));
}

#[tokio::test]
async fn test_artifact_register_is_idempotent() {
    let store = LedgerStore::ephemeral();
    let artifacts = ArtifactStore::new(store);

    let first = artifacts
        .register(BuildArtifact::new(
            "1.0.0",
            Some("abc123def".to_string()),
            "0cc175b9c0f1b6a831c399e269772661",
            "/srv/releases/1.0.0",
        ))
        .await
        .unwrap();

    // Same content rebuilt under another version label resolves to the
    // already-registered row.
    let second = artifacts
        .register(BuildArtifact::new(
            "1.0.0-rebuild",
            None,
            "0cc175b9c0f1b6a831c399e269772661",
            "/srv/releases/1.0.0-rebuild",
        ))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.local_path, "/srv/releases/1.0.0");
}

#[tokio::test]
async fn test_register_upload_hashes_content() {
    let store = LedgerStore::ephemeral();
    let artifacts = ArtifactStore::new(store);

    let registered = artifacts
        .register_upload("1.0.0", None, b"a", "/srv/releases/1.0.0")
        .await
        .unwrap();
    assert_eq!(registered.md5_hash, "0cc175b9c0f1b6a831c399e269772661");

    // Re-uploading identical bytes under a new label resolves to the
    // already-registered row.
    let again = artifacts
        .register_upload("1.0.1", None, b"a", "/srv/releases/1.0.1")
        .await
        .unwrap();
    assert_eq!(again.id, registered.id);
}

#[tokio::test]
async fn test_artifact_lookup_cascade() {
    let store = LedgerStore::ephemeral();
    let artifacts = ArtifactStore::new(store);
    let registered = artifacts
        .register(BuildArtifact::new(
            "1.0.0",
            Some("abc123def".to_string()),
            "0cc175b9c0f1b6a831c399e269772661",
            "/srv/releases/1.0.0",
        ))
        .await
        .unwrap();

    // Full hash, commit sha, and hash prefix all find the same artifact.
    for query in [
        "0cc175b9c0f1b6a831c399e269772661",
        "abc123def",
        "0cc175b9",
        "  0CC175B9  ",
    ] {
        let found = artifacts.check(query).await;
        assert_eq!(found.expect("artifact found").id, registered.id);
    }

    assert!(artifacts.check("ffffffff").await.is_none());
    assert!(artifacts.check("").await.is_none());
}

#[tokio::test]
async fn test_artifact_resolve_unknown_release() {
    let store = LedgerStore::ephemeral();
    let artifacts = ArtifactStore::new(store);

    let release = Release {
        version: "9.9.9".to_string(),
        git_commit_sha: None,
        md5_hash: Some("deadbeef".to_string()),
    };
    assert!(matches!(
        artifacts.resolve(&release).await,
        Err(PortsideError::ArtifactNotFound(_))
    ));
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");

    let app_id = Uuid::new_v4();
    let host_id = Uuid::new_v4();
    {
        let store = LedgerStore::open(&path).await.unwrap();
        let ledger = InstanceLedger::new(store);
        let instance = ledger.instance_for(app_id, host_id).await.unwrap();
        ledger
            .stage_deployment(
                instance.id,
                &PortPolicy::default(),
                "1.0.0",
                None,
                "/srv/releases/1.0.0",
            )
            .await
            .unwrap();
        ledger.transition_ports(instance.id, 4000).await.unwrap();
    }

    let store = LedgerStore::open(&path).await.unwrap();
    let ledger = InstanceLedger::new(store);
    let instance = ledger.instance_for(app_id, host_id).await.unwrap();
    assert_eq!(instance.active_port, Some(4000));
    assert_eq!(ledger.deployments_for(instance.id).await.unwrap().len(), 1);
}
