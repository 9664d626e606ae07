//! Integration tests for yard-sync
//!
//! Covers fan-out ordering, lag reporting, heartbeat tracking and stream
//! termination.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use yard_core::{ContainerStatus, Workspace, WorkspaceStateUpdate, WorkspaceStatus};
use yard_sync::{SubscriptionEvent, SyncConfig, SyncError, Synchronizer};

fn workspace(id: &str) -> Workspace {
    let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    Workspace {
        id: id.to_string(),
        repository_id: "repo-1".to_string(),
        name: id.to_string(),
        branch_name: format!("feature/{id}"),
        status: WorkspaceStatus::Active,
        container_id: None,
        container_status: ContainerStatus::None,
        container_ip: None,
        agent_connected_at: None,
        has_uncommitted_changes: false,
        last_activity_at: created,
        created_at: created,
    }
}

fn running(id: &str) -> Workspace {
    let mut ws = workspace(id);
    ws.container_id = Some(format!("ct-{id}"));
    ws.container_status = ContainerStatus::Running;
    ws.container_ip = Some("10.0.0.2".to_string());
    ws
}

async fn next(sub: &mut yard_sync::Subscription) -> SubscriptionEvent {
    timeout(Duration::from_secs(1), sub.next())
        .await
        .expect("timed out waiting for event")
        .expect("subscription ended")
}

#[tokio::test]
async fn test_two_subscribers_see_identical_sequences() {
    let sync = Synchronizer::default();
    sync.track(workspace("a"));
    sync.track(workspace("b"));

    let mut first = sync.subscribe(&["a", "b"]).unwrap();
    let mut second = sync.subscribe(&["b", "a"]).unwrap();

    let updates = vec![
        WorkspaceStateUpdate::new("a").status(ContainerStatus::Creating),
        WorkspaceStateUpdate::new("b").status(ContainerStatus::Creating),
        WorkspaceStateUpdate::new("a").container("ct-a", Some("10.0.0.1".to_string())),
        WorkspaceStateUpdate::new("a").status(ContainerStatus::Running),
        WorkspaceStateUpdate::new("b").status(ContainerStatus::Error),
    ];
    for update in &updates {
        sync.publish(update.clone()).unwrap();
    }

    let mut seen_first = Vec::new();
    let mut seen_second = Vec::new();
    for _ in 0..updates.len() {
        seen_first.push(next(&mut first).await);
        seen_second.push(next(&mut second).await);
    }

    for id in ["a", "b"] {
        let expected: Vec<_> = updates
            .iter()
            .filter(|u| u.workspace_id == id)
            .cloned()
            .map(SubscriptionEvent::Update)
            .collect();
        let per_ws = |events: &[SubscriptionEvent]| -> Vec<SubscriptionEvent> {
            events
                .iter()
                .filter(|e| e.workspace_id() == id)
                .cloned()
                .collect()
        };
        assert_eq!(per_ws(&seen_first), expected);
        assert_eq!(per_ws(&seen_second), expected);
    }

    let a = sync.snapshot("a").unwrap();
    assert_eq!(a.container_status, ContainerStatus::Running);
    assert_eq!(a.container_id.as_deref(), Some("ct-a"));
}

#[tokio::test]
async fn test_slow_subscriber_gets_lagged_marker() {
    let sync = Synchronizer::new(SyncConfig {
        channel_capacity: 2,
        ..Default::default()
    });
    sync.track(running("a"));
    let mut sub = sync.subscribe(&["a"]).unwrap();

    for status in [
        ContainerStatus::Exited,
        ContainerStatus::Running,
        ContainerStatus::Exited,
        ContainerStatus::Running,
        ContainerStatus::Exited,
    ] {
        sync.publish(WorkspaceStateUpdate::new("a").status(status))
            .unwrap();
    }

    assert_eq!(
        next(&mut sub).await,
        SubscriptionEvent::Lagged {
            workspace_id: "a".to_string(),
            skipped: 3,
        }
    );
    match next(&mut sub).await {
        SubscriptionEvent::Update(u) => {
            assert_eq!(u.container_status, Some(ContainerStatus::Running))
        }
        other => panic!("expected update, got {other:?}"),
    }
    match next(&mut sub).await {
        SubscriptionEvent::Update(u) => {
            assert_eq!(u.container_status, Some(ContainerStatus::Exited))
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_update_is_not_fanned_out() {
    let sync = Synchronizer::default();
    sync.track(workspace("a"));
    let mut sub = sync.subscribe(&["a"]).unwrap();

    let update = WorkspaceStateUpdate::new("a").status(ContainerStatus::Creating);
    let (_, first) = sync.publish(update.clone()).unwrap();
    let (_, replay) = sync.publish(update).unwrap();

    assert!(first.changed);
    assert!(!replay.changed);
    next(&mut sub).await;
    assert!(timeout(Duration::from_millis(50), sub.next()).await.is_err());
}

#[tokio::test]
async fn test_removal_clears_container_fields() {
    let sync = Synchronizer::default();
    sync.track(running("a"));

    let (ws, outcome) = sync
        .publish(WorkspaceStateUpdate::new("a").removed())
        .unwrap();

    assert!(outcome.removed);
    assert_eq!(ws.container_status, ContainerStatus::None);
    assert!(ws.container_id.is_none());
    assert!(ws.container_ip.is_none());
}

#[tokio::test]
async fn test_heartbeat_connects_once_and_sweep_only_downgrades_agent() {
    let sync = Synchronizer::default();
    sync.track(running("a"));
    let mut sub = sync.subscribe(&["a"]).unwrap();

    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();
    assert!(sync.heartbeat("a", t0).unwrap());
    assert!(!sync
        .heartbeat("a", t0 + ChronoDuration::seconds(5))
        .unwrap());
    match next(&mut sub).await {
        SubscriptionEvent::Update(u) => assert_eq!(u.agent_connected, Some(true)),
        other => panic!("expected update, got {other:?}"),
    }

    let threshold = Duration::from_secs(45);
    assert!(sync
        .sweep_stale(t0 + ChronoDuration::seconds(30), threshold)
        .is_empty());
    assert_eq!(
        sync.sweep_stale(t0 + ChronoDuration::seconds(60), threshold),
        vec!["a".to_string()]
    );

    let ws = sync.snapshot("a").unwrap();
    assert!(!ws.agent_connected());
    assert_eq!(ws.container_status, ContainerStatus::Running);
    assert_eq!(ws.container_id.as_deref(), Some("ct-a"));

    match next(&mut sub).await {
        SubscriptionEvent::Update(u) => {
            assert_eq!(u.agent_connected, Some(false));
            assert_eq!(u.container_status, None);
        }
        other => panic!("expected update, got {other:?}"),
    }

    // Coming back after the sweep reconnects.
    assert!(sync
        .heartbeat("a", t0 + ChronoDuration::seconds(61))
        .unwrap());
}

#[tokio::test]
async fn test_heartbeat_without_container_does_not_connect() {
    let sync = Synchronizer::default();
    sync.track(workspace("a"));

    assert!(!sync.heartbeat("a", Utc::now()).unwrap());
    assert!(!sync.snapshot("a").unwrap().agent_connected());
}

#[tokio::test]
async fn test_forget_ends_subscription() {
    let sync = Synchronizer::default();
    sync.track(workspace("a"));
    let mut sub = sync.subscribe(&["a"]).unwrap();

    assert!(sync.forget("a").is_some());
    let end = timeout(Duration::from_secs(1), sub.next()).await.unwrap();
    assert!(end.is_none());
    assert!(!sync.is_tracked("a"));
}

#[tokio::test]
async fn test_unknown_workspace_is_rejected() {
    let sync = Synchronizer::default();
    sync.track(workspace("a"));

    assert!(matches!(
        sync.subscribe(&["a", "missing"]),
        Err(SyncError::UnknownWorkspace(id)) if id == "missing"
    ));
    assert!(matches!(
        sync.publish(WorkspaceStateUpdate::new("missing").agent(true)),
        Err(SyncError::UnknownWorkspace(_))
    ));
    assert_eq!(sync.subscriber_count("a"), 0);
}

#[tokio::test]
async fn test_event_wire_format() {
    let lagged = SubscriptionEvent::Lagged {
        workspace_id: "a".to_string(),
        skipped: 4,
    };
    assert_eq!(
        serde_json::to_value(&lagged).unwrap(),
        serde_json::json!({"type": "lagged", "workspaceId": "a", "skipped": 4})
    );

    let update = SubscriptionEvent::Update(
        WorkspaceStateUpdate::new("a").status(ContainerStatus::Running),
    );
    let value = serde_json::to_value(&update).unwrap();
    assert_eq!(value["type"], "update");
    assert_eq!(value["workspaceId"], "a");
    assert_eq!(value["containerStatus"], "running");
    assert!(value.get("containerId").is_none());
}

#[tokio::test]
async fn test_late_update_is_dropped_without_fan_out() {
    let sync = Synchronizer::default();
    sync.track(running("a"));
    let mut sub = sync.subscribe(&["a"]).unwrap();

    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();
    let (ws, outcome) = sync
        .publish(WorkspaceStateUpdate::new("a").removed().at(t0))
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(ws.container_status, ContainerStatus::None);
    assert!(matches!(next(&mut sub).await, SubscriptionEvent::Update(_)));

    // A `running` emitted before the removal shows up afterwards.
    let late = WorkspaceStateUpdate::new("a")
        .status(ContainerStatus::Running)
        .container("ct-a", Some("10.0.0.2".to_string()))
        .at(t0 - ChronoDuration::seconds(1));
    let (ws, outcome) = sync.publish(late).unwrap();
    assert!(!outcome.changed);
    assert_eq!(ws.container_status, ContainerStatus::None);
    assert!(ws.container_id.is_none());
    assert!(timeout(Duration::from_millis(100), sub.next()).await.is_err());

    // Same instant is not stale.
    let (ws, _) = sync
        .publish(
            WorkspaceStateUpdate::new("a")
                .status(ContainerStatus::Creating)
                .at(t0),
        )
        .unwrap();
    assert_eq!(ws.container_status, ContainerStatus::Creating);
}
