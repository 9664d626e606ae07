//! Integration tests for yard-client
//!
//! Merge idempotence, removal semantics, selection restore and client-side
//! intent tracking.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tempfile::TempDir;
use yard_client::{
    ClientError, ClientState, Fetched, NoticeKind, Selection, SelectionFile, Tab, TabKind,
};
use yard_core::{
    ContainerStatus, EnvMap, IntentOp, IntentOutcome, IntentState, Repository, Workspace,
    WorkspaceStateUpdate, WorkspaceStatus,
};

fn repository(id: &str) -> Repository {
    Repository {
        id: id.to_string(),
        name: id.to_string(),
        env: EnvMap::new(),
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn workspace(id: &str, repository_id: &str) -> Workspace {
    let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    Workspace {
        id: id.to_string(),
        repository_id: repository_id.to_string(),
        name: id.to_string(),
        branch_name: format!("feature/{id}"),
        status: WorkspaceStatus::Active,
        container_id: Some(format!("ct-{id}")),
        container_status: ContainerStatus::Running,
        container_ip: Some("10.0.0.9".to_string()),
        agent_connected_at: Some(created),
        has_uncommitted_changes: false,
        last_activity_at: created,
        created_at: created,
    }
}

fn tab(id: &str, workspace_id: &str, group_id: &str) -> Tab {
    Tab {
        id: id.to_string(),
        workspace_id: workspace_id.to_string(),
        group_id: group_id.to_string(),
        kind: TabKind::Terminal,
        title: "shell".to_string(),
    }
}

fn fetched() -> Fetched {
    Fetched {
        repositories: vec![repository("repo-1")],
        workspaces: vec![workspace("ws-1", "repo-1"), workspace("ws-2", "repo-1")],
        tabs: vec![tab("t-1", "ws-1", "main"), tab("t-2", "ws-2", "main")],
    }
}

fn selected(workspace_id: &str, tab_id: &str) -> Selection {
    Selection {
        repository_id: Some("repo-1".to_string()),
        workspace_id: Some(workspace_id.to_string()),
        tab_id: Some(tab_id.to_string()),
        tab_group_id: Some("main".to_string()),
    }
}

fn updates() -> Vec<WorkspaceStateUpdate> {
    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    vec![
        WorkspaceStateUpdate::new("ws-1").status(ContainerStatus::Exited).agent(false),
        WorkspaceStateUpdate::new("ws-2").container("ct-new", Some("10.0.0.7".to_string())),
        WorkspaceStateUpdate::new("ws-1").status(ContainerStatus::Running),
        WorkspaceStateUpdate::new("ws-2").removed(),
        WorkspaceStateUpdate::new("ws-1").container("ct-ws-1", None),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, u)| u.at(t0 + ChronoDuration::seconds(i as i64)))
    .collect()
}

fn snapshot(state: &ClientState) -> (Vec<Workspace>, Vec<Tab>, Selection) {
    (
        state.workspaces().cloned().collect(),
        state.tabs().to_vec(),
        state.selection().clone(),
    )
}

#[test]
fn test_batch_chunking_matches_one_by_one() {
    let all = updates();

    let mut one_by_one = ClientState::restore(fetched(), selected("ws-2", "t-2"));
    for update in &all {
        one_by_one.apply(update).unwrap();
    }

    for chunk_size in 1..=all.len() {
        let mut chunked = ClientState::restore(fetched(), selected("ws-2", "t-2"));
        for chunk in all.chunks(chunk_size) {
            let report = chunked.apply_batch(chunk);
            assert_eq!(report.applied, chunk.len());
        }
        assert_eq!(snapshot(&chunked), snapshot(&one_by_one), "chunk size {chunk_size}");
        assert_eq!(chunked.notices(), one_by_one.notices());
    }

    let before = snapshot(&one_by_one);
    // Only the newest update per workspace is not older than what was merged.
    let replay = one_by_one.apply_batch(&all);
    assert_eq!(replay.applied, 2);
    assert_eq!(replay.stale, all.len() - 2);
    assert_eq!(snapshot(&one_by_one), before);

    let again = one_by_one.apply(all.last().unwrap()).unwrap();
    assert!(!again.changed);
}

#[test]
fn test_removal_clears_active_tab_whatever_else_is_present() {
    let mut state = ClientState::restore(fetched(), selected("ws-1", "t-1"));

    let mut update = WorkspaceStateUpdate::new("ws-1")
        .status(ContainerStatus::None)
        .agent(true);
    update.container_ip = Some("10.0.0.99".to_string()).into();
    let outcome = state.apply(&update).unwrap();

    assert!(outcome.removed);
    let ws = state.workspace("ws-1").unwrap();
    assert!(ws.container_id.is_none());
    assert!(ws.container_ip.is_none());
    assert!(ws.agent_connected_at.is_none());

    assert!(state.tabs().iter().all(|t| t.workspace_id != "ws-1"));
    assert_eq!(state.selection().tab_id, None);
    assert_eq!(state.selection().workspace_id, None);
    assert_eq!(state.selection().repository_id.as_deref(), Some("repo-1"));
    assert_eq!(state.notices().last().unwrap().kind, NoticeKind::ContainerRemoved);

    // Other workspaces keep their tabs.
    assert!(state.tabs().iter().any(|t| t.id == "t-2"));
}

#[test]
fn test_acknowledgment_alone_does_not_clear_container_ui() {
    let mut state = ClientState::restore(fetched(), selected("ws-1", "t-1"));

    // The destroy request was accepted; until the push arrives nothing changes.
    assert_eq!(state.selection().tab_id.as_deref(), Some("t-1"));
    assert_eq!(
        state.workspace("ws-1").unwrap().container_status,
        ContainerStatus::Running
    );

    state
        .apply(&WorkspaceStateUpdate::new("ws-1").removed())
        .unwrap();
    assert_eq!(state.selection().tab_id, None);
}

#[test]
fn test_unknown_workspace_reported_not_invented() {
    let mut state = ClientState::restore(fetched(), Selection::default());

    let err = state
        .apply(&WorkspaceStateUpdate::new("ws-9").status(ContainerStatus::Running))
        .unwrap_err();
    assert!(matches!(err, ClientError::UnknownWorkspace(id) if id == "ws-9"));
    assert!(state.workspace("ws-9").is_none());

    let batch = vec![
        WorkspaceStateUpdate::new("ws-9").status(ContainerStatus::Running),
        WorkspaceStateUpdate::new("ws-1").status(ContainerStatus::Exited),
        WorkspaceStateUpdate::new("ws-9").status(ContainerStatus::Error),
    ];
    let report = state.apply_batch(&batch);
    assert_eq!(report.applied, 1);
    assert_eq!(report.unknown, vec!["ws-9".to_string()]);
}

#[test]
fn test_restore_clears_missing_pointers_with_notice() {
    let mut gone = fetched();
    gone.tabs.retain(|t| t.id != "t-1");

    let state = ClientState::restore(gone, selected("ws-1", "t-1"));
    assert_eq!(state.selection().workspace_id.as_deref(), Some("ws-1"));
    assert_eq!(state.selection().tab_id, None);
    assert_eq!(state.selection().tab_group_id, None);

    let kinds: Vec<_> = state.notices().iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NoticeKind::TabGone, NoticeKind::TabGroupGone]);
}

#[test]
fn test_restore_never_reselects_deleted_workspace() {
    let mut gone = fetched();
    gone.workspaces.retain(|w| w.id != "ws-1");
    gone.tabs.retain(|t| t.workspace_id != "ws-1");

    let mut state = ClientState::restore(gone, selected("ws-1", "t-1"));
    assert_eq!(state.selection().workspace_id, None);
    assert_eq!(state.selection().tab_id, None);
    assert_eq!(state.selection().repository_id.as_deref(), Some("repo-1"));

    let notice = state.notices()[0].clone();
    assert_eq!(notice.kind, NoticeKind::WorkspaceGone);
    assert_eq!(notice.entity_id, "ws-1");
    assert!(state.dismiss_notice(notice.id));
    assert!(state.notices().is_empty());
}

#[test]
fn test_restore_with_missing_repository_clears_everything() {
    let state = ClientState::restore(
        Fetched {
            repositories: vec![repository("repo-2")],
            ..fetched()
        },
        selected("ws-1", "t-1"),
    );
    assert!(state.selection().is_empty());
    assert_eq!(state.notices().len(), 1);
    assert_eq!(state.notices()[0].kind, NoticeKind::RepositoryGone);
}

#[test]
fn test_resync_replaces_state_and_revalidates() {
    let mut state = ClientState::restore(fetched(), selected("ws-2", "t-2"));

    let mut fresh = fetched();
    fresh.workspaces.retain(|w| w.id != "ws-2");
    fresh.workspaces[0].container_status = ContainerStatus::Exited;
    state.resync(fresh);

    assert!(state.workspace("ws-2").is_none());
    assert_eq!(
        state.workspace("ws-1").unwrap().container_status,
        ContainerStatus::Exited
    );
    assert!(state.tabs().iter().all(|t| t.workspace_id != "ws-2"));
    assert_eq!(state.selection().workspace_id, None);
    assert_eq!(state.notices()[0].kind, NoticeKind::WorkspaceGone);
}

#[test]
fn test_intent_resolves_only_on_terminal_push() {
    let mut state = ClientState::restore(fetched(), Selection::default());
    state.apply(&WorkspaceStateUpdate::new("ws-1").removed()).unwrap();

    state.begin_intent("ws-1", IntentOp::Deploy).unwrap();
    // The service acknowledged; still pending.
    assert!(state.intent("ws-1").is_pending());

    state
        .apply(&WorkspaceStateUpdate::new("ws-1").status(ContainerStatus::Creating))
        .unwrap();
    assert!(state.intent("ws-1").is_pending());

    state
        .apply(&WorkspaceStateUpdate::new("ws-1").status(ContainerStatus::Running))
        .unwrap();
    assert_eq!(
        state.intent("ws-1"),
        IntentState::Resolved {
            op: IntentOp::Deploy,
            outcome: IntentOutcome::Ready
        }
    );

    state.acknowledge_intent("ws-1");
    assert_eq!(state.intent("ws-1"), IntentState::Idle);
}

#[test]
fn test_transport_failure_rolls_intent_back() {
    let mut state = ClientState::restore(fetched(), Selection::default());

    state.begin_intent("ws-1", IntentOp::Redeploy).unwrap();
    assert!(state.begin_intent("ws-1", IntentOp::Deploy).is_err());

    state.request_failed("ws-1");
    assert_eq!(state.intent("ws-1"), IntentState::Idle);
    assert!(state.begin_intent("ws-1", IntentOp::Redeploy).is_ok());
}

#[test]
fn test_resync_resolves_intent_missed_while_disconnected() {
    let mut state = ClientState::restore(fetched(), Selection::default());
    state.begin_intent("ws-1", IntentOp::Redeploy).unwrap();

    let mut fresh = fetched();
    fresh.workspaces[0].container_status = ContainerStatus::Error;
    state.resync(fresh);

    assert_eq!(
        state.intent("ws-1"),
        IntentState::Resolved {
            op: IntentOp::Redeploy,
            outcome: IntentOutcome::Failed
        }
    );
}

#[test]
fn test_terminal_tab_needs_container() {
    let mut state = ClientState::restore(fetched(), Selection::default());
    state.apply(&WorkspaceStateUpdate::new("ws-2").removed()).unwrap();

    let err = state.open_tab(tab("t-9", "ws-2", "main")).unwrap_err();
    assert!(matches!(err, ClientError::NoContainer(_)));

    state.open_tab(tab("t-3", "ws-1", "side")).unwrap();
    assert_eq!(state.selection().tab_id.as_deref(), Some("t-3"));
    assert_eq!(state.selection().tab_group_id.as_deref(), Some("side"));
}

#[test]
fn test_selection_survives_reload_through_file() {
    let dir = TempDir::new().unwrap();
    let file = SelectionFile::new(dir.path().join("selection.json"));

    let mut state = ClientState::restore(fetched(), Selection::default());
    state.select_workspace("ws-2").unwrap();
    file.save(state.selection()).unwrap();

    let reloaded = ClientState::restore(fetched(), file.load().unwrap());
    assert_eq!(reloaded.selection().workspace_id.as_deref(), Some("ws-2"));
    assert!(reloaded.notices().is_empty());
}

#[test]
fn test_late_running_after_removal_is_dropped() {
    let mut state = ClientState::restore(fetched(), selected("ws-1", "t-1"));
    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();

    state
        .apply(&WorkspaceStateUpdate::new("ws-1").removed().at(t0))
        .unwrap();
    let notices = state.notices().len();

    let late = WorkspaceStateUpdate::new("ws-1")
        .status(ContainerStatus::Running)
        .container("ct-ws-1", Some("10.0.0.9".to_string()))
        .at(t0 - ChronoDuration::seconds(2));
    let outcome = state.apply(&late).unwrap();
    assert!(!outcome.changed);

    let ws = state.workspace("ws-1").unwrap();
    assert_eq!(ws.container_status, ContainerStatus::None);
    assert!(ws.container_id.is_none());
    assert_eq!(state.notices().len(), notices);

    let report = state.apply_batch([&late]);
    assert_eq!(report.applied, 0);
    assert_eq!(report.stale, 1);
}
