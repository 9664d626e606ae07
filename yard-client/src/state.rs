//! Local mirror of workspace state kept by a client.

use crate::error::{ClientError, Result};
use crate::selection::Selection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use yard_core::{
    IntentOp, IntentState, IntentTable, MergeOutcome, Repository, UpdateClock, Workspace,
    WorkspaceStateUpdate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabKind {
    Terminal,
    Editor,
    Preview,
}

/// An open tab. Every tab belongs to one workspace and lives in one tab group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: String,
    pub workspace_id: String,
    pub group_id: String,
    pub kind: TabKind,
    pub title: String,
}

/// Full state as freshly fetched from the service.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub repositories: Vec<Repository>,
    pub workspaces: Vec<Workspace>,
    pub tabs: Vec<Tab>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    RepositoryGone,
    WorkspaceGone,
    TabGone,
    TabGroupGone,
    ContainerRemoved,
}

/// Something the user should be told about until they dismiss it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub entity_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub changed: usize,
    /// Updates dropped because something newer was already merged.
    pub stale: usize,
    /// Workspaces the updates referred to that are not known locally.
    pub unknown: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ClientState {
    repositories: BTreeMap<String, Repository>,
    workspaces: BTreeMap<String, Workspace>,
    tabs: Vec<Tab>,
    selection: Selection,
    intents: IntentTable,
    clock: UpdateClock,
    notices: Vec<Notice>,
    next_notice: u64,
}

impl ClientState {
    /// Build state from a fresh fetch and a persisted selection. Pointers
    /// that no longer resolve are cleared and reported as notices.
    pub fn restore(fetched: Fetched, persisted: Selection) -> Self {
        let mut state = Self::default();
        state.replace(fetched);
        state.selection = persisted;
        state.validate_selection();
        state
    }

    /// Replace local state after a reconnect or a lagged subscription.
    pub fn resync(&mut self, fetched: Fetched) {
        self.replace(fetched);

        let known: BTreeSet<String> = self.workspaces.keys().cloned().collect();
        let pending: Vec<String> = self
            .workspaces
            .keys()
            .filter(|id| self.intents.get(id).is_pending())
            .cloned()
            .collect();
        // A terminal push may have been missed while disconnected.
        for id in pending {
            if let Some(status) = self.workspaces.get(&id).map(|w| w.container_status) {
                self.intents.observe(&id, status);
            }
        }
        let stale: Vec<String> = self
            .tabs
            .iter()
            .map(|t| t.workspace_id.clone())
            .filter(|id| !known.contains(id))
            .collect();
        for id in stale {
            self.tabs.retain(|t| t.workspace_id != id);
        }

        self.validate_selection();
    }

    fn replace(&mut self, fetched: Fetched) {
        self.repositories = fetched
            .repositories
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        self.workspaces = fetched
            .workspaces
            .into_iter()
            .map(|w| (w.id.clone(), w))
            .collect();
        self.tabs = fetched.tabs;
    }

    fn validate_selection(&mut self) {
        let selection = self.selection.clone();

        if let Some(repository_id) = &selection.repository_id {
            if !self.repositories.contains_key(repository_id) {
                self.selection = Selection::default();
                self.notify(
                    NoticeKind::RepositoryGone,
                    repository_id,
                    "The previously selected repository no longer exists",
                );
                return;
            }
        }

        if let Some(workspace_id) = &selection.workspace_id {
            let belongs = self.workspaces.get(workspace_id).is_some_and(|w| {
                selection
                    .repository_id
                    .as_ref()
                    .map_or(true, |r| r == &w.repository_id)
            });
            if !belongs {
                self.selection.clear_workspace();
                self.notify(
                    NoticeKind::WorkspaceGone,
                    workspace_id,
                    "The previously selected workspace no longer exists",
                );
                return;
            }
        }

        let in_workspace = |tab: &Tab| Some(&tab.workspace_id) == selection.workspace_id.as_ref();

        if let Some(tab_id) = &selection.tab_id {
            if !self.tabs.iter().any(|t| &t.id == tab_id && in_workspace(t)) {
                self.selection.tab_id = None;
                self.notify(NoticeKind::TabGone, tab_id, "The previously open tab was closed");
            }
        }

        if let Some(group_id) = &selection.tab_group_id {
            if !self
                .tabs
                .iter()
                .any(|t| &t.group_id == group_id && in_workspace(t))
            {
                self.selection.tab_group_id = None;
                self.notify(
                    NoticeKind::TabGroupGone,
                    group_id,
                    "The previously open tab group no longer exists",
                );
            }
        }
    }

    fn notify(&mut self, kind: NoticeKind, entity_id: &str, message: &str) {
        self.next_notice += 1;
        debug!(?kind, entity_id, "notice raised");
        self.notices.push(Notice {
            id: self.next_notice,
            kind,
            entity_id: entity_id.to_string(),
            message: message.to_string(),
        });
    }

    /// Merge one pushed update. A late update, emitted before the last one
    /// merged for its workspace, is dropped and changes nothing.
    pub fn apply(&mut self, update: &WorkspaceStateUpdate) -> Result<MergeOutcome> {
        Ok(self.merge(update)?.unwrap_or_default())
    }

    /// `None` when the update was stale.
    fn merge(&mut self, update: &WorkspaceStateUpdate) -> Result<Option<MergeOutcome>> {
        let workspace = self
            .workspaces
            .get_mut(&update.workspace_id)
            .ok_or_else(|| ClientError::UnknownWorkspace(update.workspace_id.clone()))?;
        if !self.clock.admit(update) {
            debug!(workspace_id = %update.workspace_id, emitted_at = %update.emitted_at, "stale update dropped");
            return Ok(None);
        }
        let outcome = workspace.apply_update(update)?;

        if update.is_removal() && self.clear_workspace_scope(&update.workspace_id) {
            self.notify(
                NoticeKind::ContainerRemoved,
                &update.workspace_id,
                "The workspace container was removed",
            );
        }
        if let Some(status) = update.container_status {
            self.intents.observe(&update.workspace_id, status);
        }

        Ok(Some(outcome))
    }

    /// Merge a batch in order. The result is the same however the updates are chunked.
    pub fn apply_batch<'a>(
        &mut self,
        updates: impl IntoIterator<Item = &'a WorkspaceStateUpdate>,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for update in updates {
            match self.merge(update) {
                Ok(Some(outcome)) => {
                    report.applied += 1;
                    if outcome.changed {
                        report.changed += 1;
                    }
                }
                Ok(None) => report.stale += 1,
                Err(ClientError::UnknownWorkspace(id)) => {
                    if !report.unknown.contains(&id) {
                        report.unknown.push(id);
                    }
                }
                Err(e) => warn!(workspace_id = %update.workspace_id, error = %e, "update skipped"),
            }
        }
        report
    }

    /// Close every tab of a workspace and fall back to the repository view if
    /// it was selected. Returns whether anything was cleared.
    fn clear_workspace_scope(&mut self, workspace_id: &str) -> bool {
        let before = self.tabs.len();
        self.tabs.retain(|t| t.workspace_id != workspace_id);
        let mut cleared = self.tabs.len() != before;

        if self.selection.workspace_id.as_deref() == Some(workspace_id) {
            self.selection.clear_workspace();
            cleared = true;
        }
        cleared
    }

    pub fn workspace(&self, id: &str) -> Option<&Workspace> {
        self.workspaces.get(id)
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.values()
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Open a tab. Terminals need a container to attach to.
    pub fn open_tab(&mut self, tab: Tab) -> Result<()> {
        let workspace = self
            .workspaces
            .get(&tab.workspace_id)
            .ok_or_else(|| ClientError::UnknownWorkspace(tab.workspace_id.clone()))?;
        if tab.kind == TabKind::Terminal && !workspace.has_container() {
            return Err(ClientError::NoContainer(tab.workspace_id));
        }

        self.selection.repository_id = Some(workspace.repository_id.clone());
        self.selection.workspace_id = Some(tab.workspace_id.clone());
        self.selection.tab_id = Some(tab.id.clone());
        self.selection.tab_group_id = Some(tab.group_id.clone());
        self.tabs.retain(|t| t.id != tab.id);
        self.tabs.push(tab);
        Ok(())
    }

    pub fn close_tab(&mut self, tab_id: &str) {
        self.tabs.retain(|t| t.id != tab_id);
        if self.selection.tab_id.as_deref() == Some(tab_id) {
            self.selection.tab_id = None;
        }
    }

    pub fn select_workspace(&mut self, workspace_id: &str) -> Result<()> {
        let workspace = self
            .workspaces
            .get(workspace_id)
            .ok_or_else(|| ClientError::UnknownWorkspace(workspace_id.to_string()))?;
        self.selection = Selection {
            repository_id: Some(workspace.repository_id.clone()),
            workspace_id: Some(workspace_id.to_string()),
            tab_id: None,
            tab_group_id: None,
        };
        Ok(())
    }

    /// Record an optimistic intent before sending a deploy or redeploy.
    pub fn begin_intent(&mut self, workspace_id: &str, op: IntentOp) -> Result<()> {
        if !self.workspaces.contains_key(workspace_id) {
            return Err(ClientError::UnknownWorkspace(workspace_id.to_string()));
        }
        self.intents.begin(workspace_id, op, Utc::now())?;
        Ok(())
    }

    /// The request never reached the service; nothing is going to resolve the intent.
    pub fn request_failed(&mut self, workspace_id: &str) {
        self.intents.rollback(workspace_id);
    }

    pub fn intent(&self, workspace_id: &str) -> IntentState {
        self.intents.get(workspace_id)
    }

    pub fn acknowledge_intent(&mut self, workspace_id: &str) {
        self.intents.acknowledge(workspace_id);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }
}
