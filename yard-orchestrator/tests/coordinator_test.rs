//! Integration tests for yard-orchestrator
//!
//! Drives the coordinator against the mock driver, an in-memory store and a
//! real synchronizer.

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use yard_core::{
    ContainerStatus, EnvMap, IntentOp, IntentOutcome, IntentState, Workspace,
    WorkspaceStateUpdate,
};
use yard_orchestrator::{
    AgentReport, Coordinator, CoordinatorConfig, CoordinatorError, EnvResolution, GateOutcome,
};
use yard_provider::mock::{MockDriver, MockOp};
use yard_store::{NewWorkspace, OperationStatus, OperationType, Store, StoreError};
use yard_sync::{SubscriptionEvent, Synchronizer};

struct Harness {
    coordinator: Coordinator,
    driver: MockDriver,
    store: Store,
    workspace: Workspace,
}

fn env(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn setup() -> Harness {
    let store = Store::open_in_memory().await.unwrap();
    let repo = store
        .create_repository("web", &env(&[("PORT", "3000")]))
        .await
        .unwrap();

    let driver = MockDriver::new();
    let coordinator = Coordinator::new(
        store.clone(),
        Synchronizer::default(),
        Arc::new(driver.clone()),
        CoordinatorConfig::default(),
    );
    let workspace = coordinator
        .create_workspace(&NewWorkspace {
            repository_id: repo.id,
            name: "login".to_string(),
            branch_name: "feature/login".to_string(),
        })
        .await
        .unwrap();

    Harness {
        coordinator,
        driver,
        store,
        workspace,
    }
}

async fn wait_idle(coordinator: &Coordinator, id: &str) {
    timeout(Duration::from_secs(5), async {
        while coordinator.in_flight_operation(id).is_some() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("operation did not finish");
}

/// Deploy and let the agent check in.
async fn running(h: &Harness) -> Workspace {
    let id = &h.workspace.id;
    h.coordinator.deploy(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;
    h.coordinator
        .agent_heartbeat(id, AgentReport::default())
        .await
        .unwrap()
}

fn ticket(outcome: GateOutcome) -> yard_orchestrator::OperationTicket {
    match outcome {
        GateOutcome::Proceeded(ticket) => ticket,
        other => panic!("expected the operation to proceed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_deploy_waits_for_agent_before_running() {
    let h = setup().await;
    let id = &h.workspace.id;

    let ticket = h.coordinator.deploy(id).await.unwrap();
    assert_eq!(ticket.operation_type, OperationType::Deploy);
    wait_idle(&h.coordinator, id).await;

    // Acknowledged and the container exists, but nothing terminal observed yet.
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Creating);
    assert_eq!(ws.container_id.as_deref(), Some("ct-1"));
    assert!(h.coordinator.intent(id).is_pending());

    let ws = h
        .coordinator
        .agent_heartbeat(id, AgentReport::default())
        .await
        .unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Running);
    assert!(ws.agent_connected_at.is_some());
    assert_eq!(
        h.coordinator.intent(id),
        IntentState::Resolved {
            op: IntentOp::Deploy,
            outcome: IntentOutcome::Ready
        }
    );

    let op = h.store.get_operation(&ticket.operation_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Success);
    assert_eq!(
        h.driver.container("ct-1").unwrap().env,
        "PORT=3000\n".to_string()
    );
}

#[tokio::test]
async fn test_failed_deploy_resolves_intent_as_failed() {
    let h = setup().await;
    let id = &h.workspace.id;
    h.driver.fail_next(MockOp::Create, "no capacity");

    let ticket = h.coordinator.deploy(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;

    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Error);
    assert_eq!(
        h.coordinator.intent(id),
        IntentState::Resolved {
            op: IntentOp::Deploy,
            outcome: IntentOutcome::Failed
        }
    );

    let op = h.store.get_operation(&ticket.operation_id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert!(op.error.unwrap().contains("no capacity"));
}

#[tokio::test]
async fn test_deploy_rejected_when_container_exists() {
    let h = setup().await;
    running(&h).await;

    let err = h.coordinator.deploy(&h.workspace.id).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    assert_eq!(h.driver.calls_of(MockOp::Create).len(), 1);
}

#[tokio::test]
async fn test_redeploy_blocked_until_divergence_resolved() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    h.driver.set_env("ct-1", "PORT=4000\nDEBUG=1\n");

    let outcome = h.coordinator.redeploy(id, None).await.unwrap();
    let GateOutcome::NeedsResolution(diff) = outcome else {
        panic!("expected a resolution prompt, got {outcome:?}");
    };
    assert_eq!(diff.added, env(&[("DEBUG", "1")]));
    assert_eq!(diff.changed["PORT"].live, "4000");
    assert!(h.driver.calls_of(MockOp::Destroy).is_empty());
    assert!(h.coordinator.in_flight_operation(id).is_none());

    let outcome = h
        .coordinator
        .redeploy(id, Some(EnvResolution::Cancel))
        .await
        .unwrap();
    assert_eq!(outcome, GateOutcome::Cancelled);
    assert!(h.driver.calls_of(MockOp::Destroy).is_empty());
}

#[tokio::test]
async fn test_sync_then_proceed_saves_live_env_first() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    h.driver.set_env("ct-1", "PORT=4000\nDEBUG=1\n");

    ticket(
        h.coordinator
            .redeploy(id, Some(EnvResolution::SyncThenProceed))
            .await
            .unwrap(),
    );
    wait_idle(&h.coordinator, id).await;

    let stored = h
        .store
        .get_repository_env(&h.workspace.repository_id)
        .await
        .unwrap();
    assert_eq!(stored, env(&[("DEBUG", "1"), ("PORT", "4000")]));

    assert_eq!(h.driver.calls_of(MockOp::Destroy), vec!["ct-1".to_string()]);
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_id.as_deref(), Some("ct-2"));
    assert_eq!(h.driver.container("ct-2").unwrap().env, "DEBUG=1\nPORT=4000\n");
}

#[tokio::test]
async fn test_proceed_without_sync_keeps_stored_env() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    h.driver.set_env("ct-1", "PORT=4000\n");

    ticket(
        h.coordinator
            .redeploy(id, Some(EnvResolution::ProceedWithoutSync))
            .await
            .unwrap(),
    );
    wait_idle(&h.coordinator, id).await;

    let stored = h
        .store
        .get_repository_env(&h.workspace.repository_id)
        .await
        .unwrap();
    assert_eq!(stored, env(&[("PORT", "3000")]));
    assert_eq!(h.driver.container("ct-2").unwrap().env, "PORT=3000\n");
}

#[tokio::test]
async fn test_redeploy_with_matching_env_proceeds() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;

    ticket(h.coordinator.redeploy(id, None).await.unwrap());
    wait_idle(&h.coordinator, id).await;

    assert!(h.coordinator.intent(id).is_pending());
    h.coordinator
        .agent_heartbeat(id, AgentReport::default())
        .await
        .unwrap();
    assert_eq!(
        h.coordinator.intent(id),
        IntentState::Resolved {
            op: IntentOp::Redeploy,
            outcome: IntentOutcome::Ready
        }
    );
}

#[tokio::test]
async fn test_unreadable_env_blocks_destructive_operation() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    h.driver.fail_next(MockOp::ReadEnv, "ssh timeout");

    let err = h
        .coordinator
        .destroy(id, Some(EnvResolution::ProceedWithoutSync))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::EnvDiff { .. }), "{err:?}");
    assert!(h.driver.calls_of(MockOp::Destroy).is_empty());
    assert!(h.coordinator.in_flight_operation(id).is_none());
}

#[tokio::test]
async fn test_second_operation_rejected_while_one_is_in_flight() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    h.driver.hold(MockOp::Restart);

    h.coordinator.restart(id).await.unwrap();

    let err = h.coordinator.shutdown(id).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::OperationInProgress {
            operation: OperationType::Restart,
            ..
        }
    ));
    let err = h.coordinator.redeploy(id, None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::OperationInProgress { .. }));

    h.driver.release(MockOp::Restart);
    wait_idle(&h.coordinator, id).await;
    assert!(h.coordinator.shutdown(id).await.is_ok());
}

#[tokio::test]
async fn test_destroy_update_only_arrives_after_driver_finishes() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    let mut sub = h.coordinator.synchronizer().subscribe(&[id]).unwrap();
    h.driver.hold(MockOp::Destroy);

    ticket(h.coordinator.destroy(id, None).await.unwrap());

    sleep(Duration::from_millis(20)).await;
    let snapshot = h.coordinator.synchronizer().snapshot(id).unwrap();
    assert_eq!(snapshot.container_status, ContainerStatus::Running);
    assert_eq!(snapshot.container_id.as_deref(), Some("ct-1"));

    h.driver.release(MockOp::Destroy);
    let event = timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap()
        .unwrap();
    let SubscriptionEvent::Update(update) = event else {
        panic!("unexpected event {event:?}");
    };
    assert!(update.is_removal());

    wait_idle(&h.coordinator, id).await;
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::None);
    assert!(ws.container_id.is_none());
}

#[tokio::test]
async fn test_shutdown_then_start() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;

    h.coordinator.shutdown(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Exited);
    assert!(ws.agent_connected_at.is_none());
    assert!(!h.driver.container("ct-1").unwrap().running);

    let err = h.coordinator.restart(id).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));

    h.coordinator.start(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Running);
    assert!(h.driver.container("ct-1").unwrap().running);
}

#[tokio::test]
async fn test_delete_workspace_removes_record_and_ends_stream() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    let mut sub = h.coordinator.synchronizer().subscribe(&[id]).unwrap();

    ticket(h.coordinator.delete_workspace(id, None).await.unwrap());
    wait_idle(&h.coordinator, id).await;

    let err = h.store.get_workspace(id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    assert!(!h.coordinator.synchronizer().is_tracked(id));
    assert!(h.driver.container("ct-1").is_none());

    let mut events = Vec::new();
    timeout(Duration::from_secs(1), async {
        while let Some(event) = sub.next().await {
            events.push(event);
        }
    })
    .await
    .expect("stream did not end");
    assert_eq!(events.len(), 1);
    let ops = h.coordinator.list_operations(Some(id)).await.unwrap();
    assert_eq!(ops[0].operation_type, OperationType::Delete);
}

#[tokio::test]
async fn test_watchdog_reports_stalled_intent() {
    let h = setup().await;
    let id = &h.workspace.id;
    h.coordinator.deploy(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;

    assert!(h.coordinator.expire_intents(Utc::now()).is_empty());

    let stalled = h
        .coordinator
        .expire_intents(Utc::now() + ChronoDuration::minutes(11));
    assert_eq!(stalled, vec![(id.clone(), IntentOp::Deploy)]);
    assert_eq!(
        h.coordinator.intent(id),
        IntentState::Resolved {
            op: IntentOp::Deploy,
            outcome: IntentOutcome::Stalled
        }
    );

    h.coordinator.acknowledge_intent(id);
    assert_eq!(h.coordinator.intent(id), IntentState::Idle);
}

#[tokio::test]
async fn test_driver_push_is_persisted() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;

    h.coordinator
        .ingest(WorkspaceStateUpdate::new(id.as_str()).status(ContainerStatus::Dead))
        .await
        .unwrap();

    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Dead);
    assert!(h.coordinator.start(id).await.is_ok());
}

#[tokio::test]
async fn test_heartbeat_records_uncommitted_changes() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;

    let ws = h
        .coordinator
        .agent_heartbeat(
            id,
            AgentReport {
                has_uncommitted_changes: Some(true),
            },
        )
        .await
        .unwrap();
    assert!(ws.has_uncommitted_changes);
    assert_eq!(ws.container_status, ContainerStatus::Running);
}

#[tokio::test]
async fn test_restore_state_tracks_persisted_workspaces() {
    let h = setup().await;
    running(&h).await;

    let restored = Coordinator::new(
        h.store.clone(),
        Synchronizer::default(),
        Arc::new(h.driver.clone()),
        CoordinatorConfig::default(),
    );
    assert_eq!(restored.restore_state().await.unwrap(), 1);

    let snapshot = restored.synchronizer().snapshot(&h.workspace.id).unwrap();
    assert_eq!(snapshot.container_status, ContainerStatus::Running);
    assert_eq!(snapshot.container_id.as_deref(), Some("ct-1"));
}

#[tokio::test]
async fn test_empty_branch_rejected() {
    let h = setup().await;
    let err = h
        .coordinator
        .create_workspace(&NewWorkspace {
            repository_id: h.workspace.repository_id.clone(),
            name: "x".to_string(),
            branch_name: "  ".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Validation(_)));
}

#[tokio::test]
async fn test_redeploy_replaces_pending_deploy_intent() {
    let h = setup().await;
    let id = &h.workspace.id;
    h.coordinator.deploy(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;

    // The agent never checked in: still creating, deploy intent pending.
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Creating);
    assert!(matches!(
        h.coordinator.intent(id),
        IntentState::Pending {
            op: IntentOp::Deploy,
            ..
        }
    ));

    ticket(h.coordinator.redeploy(id, None).await.unwrap());
    wait_idle(&h.coordinator, id).await;

    assert_eq!(h.driver.calls_of(MockOp::Destroy), vec!["ct-1".to_string()]);
    assert!(h.driver.container("ct-1").is_none());
    let ws = h.store.get_workspace(id).await.unwrap();
    assert_eq!(ws.container_id.as_deref(), Some("ct-2"));
    assert!(matches!(
        h.coordinator.intent(id),
        IntentState::Pending {
            op: IntentOp::Redeploy,
            ..
        }
    ));

    h.coordinator
        .agent_heartbeat(id, AgentReport::default())
        .await
        .unwrap();
    assert_eq!(
        h.coordinator.intent(id),
        IntentState::Resolved {
            op: IntentOp::Redeploy,
            outcome: IntentOutcome::Ready
        }
    );
}

#[tokio::test]
async fn test_gated_redeploy_keeps_the_pending_deploy_intent() {
    let h = setup().await;
    let id = &h.workspace.id;
    h.coordinator.deploy(id).await.unwrap();
    wait_idle(&h.coordinator, id).await;
    let pending = h.coordinator.intent(id);
    h.driver.set_env("ct-1", "PORT=9999\nNEW=1\n");

    let outcome = h.coordinator.redeploy(id, None).await.unwrap();
    assert!(matches!(outcome, GateOutcome::NeedsResolution(_)));
    assert_eq!(h.coordinator.intent(id), pending);

    let outcome = h
        .coordinator
        .redeploy(id, Some(EnvResolution::Cancel))
        .await
        .unwrap();
    assert_eq!(outcome, GateOutcome::Cancelled);
    assert_eq!(h.coordinator.intent(id), pending);
    assert!(h.driver.calls_of(MockOp::Destroy).is_empty());
}

#[tokio::test]
async fn test_refused_redeploy_does_not_sync_env() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    h.driver.set_env("ct-1", "PORT=9999\nNEW=1\n");
    h.driver.hold(MockOp::Restart);
    h.coordinator.restart(id).await.unwrap();

    let err = h
        .coordinator
        .redeploy(id, Some(EnvResolution::SyncThenProceed))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::OperationInProgress { .. }));

    let stored = h
        .store
        .get_repository_env(&h.workspace.repository_id)
        .await
        .unwrap();
    assert_eq!(stored, env(&[("PORT", "3000")]));

    h.driver.release(MockOp::Restart);
    wait_idle(&h.coordinator, id).await;
}

#[tokio::test]
async fn test_operation_queued_behind_deploy_sees_its_container() {
    let h = setup().await;
    let id = &h.workspace.id;
    h.driver.hold(MockOp::Create);
    h.coordinator.deploy(id).await.unwrap();

    let err = h.coordinator.redeploy(id, None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::OperationInProgress { .. }));

    h.driver.release(MockOp::Create);
    wait_idle(&h.coordinator, id).await;

    ticket(h.coordinator.redeploy(id, None).await.unwrap());
    wait_idle(&h.coordinator, id).await;

    // The deploy's container was torn down, not left behind.
    assert_eq!(h.driver.calls_of(MockOp::Destroy), vec!["ct-1".to_string()]);
    assert!(h.driver.container("ct-1").is_none());
    assert!(h.driver.container("ct-2").is_some());
}

#[tokio::test]
async fn test_heartbeat_sweep_persists_agent_downgrade() {
    let h = setup().await;
    let id = &h.workspace.id;
    running(&h).await;
    assert!(h
        .store
        .get_workspace(id)
        .await
        .unwrap()
        .agent_connected_at
        .is_some());

    assert!(h.coordinator.sweep_stale_agents(Utc::now()).await.is_empty());
    let downgraded = h
        .coordinator
        .sweep_stale_agents(Utc::now() + ChronoDuration::seconds(120))
        .await;
    assert_eq!(downgraded, vec![id.clone()]);

    let ws = h.store.get_workspace(id).await.unwrap();
    assert!(ws.agent_connected_at.is_none());
    assert_eq!(ws.container_status, ContainerStatus::Running);

    // A restart rebuilds state from the store and keeps the downgrade.
    let restored = Coordinator::new(
        h.store.clone(),
        Synchronizer::default(),
        Arc::new(h.driver.clone()),
        CoordinatorConfig::default(),
    );
    restored.restore_state().await.unwrap();
    assert!(!restored.synchronizer().snapshot(id).unwrap().agent_connected());
}
