use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Active,
    Archived,
    Error,
}

text_enum!(WorkspaceStatus, "workspace status" {
    Active => "active",
    Archived => "archived",
    Error => "error",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    None,
    Creating,
    Running,
    Exited,
    Dead,
    Error,
}

text_enum!(ContainerStatus, "container status" {
    None => "none",
    Creating => "creating",
    Running => "running",
    Exited => "exited",
    Dead => "dead",
    Error => "error",
});

impl ContainerStatus {
    /// Statuses that end a pending deploy or redeploy.
    pub fn resolves_intent(&self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Error)
    }
}

/// A field of a partial update.
///
/// Absent on the wire means `Unchanged`, an explicit `null` means `Cleared`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Unchanged,
    Cleared,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unchanged
    }
}

impl<T: Clone> Patch<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Patch::Unchanged)
    }

    pub fn apply_to(&self, slot: &mut Option<T>) {
        match self {
            Patch::Unchanged => {}
            Patch::Cleared => *slot = None,
            Patch::Set(value) => *slot = Some(value.clone()),
        }
    }
}

impl Patch<String> {
    /// An empty string is the other spelling of "cleared".
    fn normalized(&self) -> Patch<String> {
        match self {
            Patch::Set(value) if value.trim().is_empty() => Patch::Cleared,
            other => other.clone(),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Patch::Cleared, Patch::Set)
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Patch::Set(value) => serializer.serialize_some(value),
            Patch::Unchanged | Patch::Cleared => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Patch::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub repository_id: String,
    pub name: String,
    pub branch_name: String,
    pub status: WorkspaceStatus,
    pub container_id: Option<String>,
    pub container_status: ContainerStatus,
    pub container_ip: Option<String>,
    pub agent_connected_at: Option<DateTime<Utc>>,
    pub has_uncommitted_changes: bool,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// What a merge did to a workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub changed: bool,
    /// The update moved the container to `none`; workspace-scoped state downstream must go.
    pub removed: bool,
}

impl Workspace {
    pub fn has_container(&self) -> bool {
        self.container_id.is_some()
    }

    pub fn agent_connected(&self) -> bool {
        self.agent_connected_at.is_some()
    }

    /// Shallow-merge the fields present on `update`.
    ///
    /// Applying the same update twice leaves the workspace as after the first
    /// application, so replayed or duplicated pushes are harmless.
    pub fn apply_update(&mut self, update: &WorkspaceStateUpdate) -> Result<MergeOutcome> {
        if update.workspace_id != self.id {
            return Err(CoreError::WorkspaceMismatch {
                expected: self.id.clone(),
                got: update.workspace_id.clone(),
            });
        }

        let before = self.clone();

        if let Some(status) = update.container_status {
            self.container_status = status;
        }
        update.container_id.normalized().apply_to(&mut self.container_id);
        update.container_ip.normalized().apply_to(&mut self.container_ip);

        match update.agent_connected {
            Some(true) => {
                self.agent_connected_at.get_or_insert(update.emitted_at);
            }
            Some(false) => self.agent_connected_at = None,
            None => {}
        }

        if self.container_status == ContainerStatus::None {
            self.container_id = None;
            self.container_ip = None;
            self.agent_connected_at = None;
        }

        Ok(MergeOutcome {
            changed: *self != before,
            removed: update.container_status == Some(ContainerStatus::None),
        })
    }
}

/// A partial, pushed change to one workspace's container state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStateUpdate {
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_status: Option<ContainerStatus>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub container_id: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_unchanged")]
    pub container_ip: Patch<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_connected: Option<bool>,
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl WorkspaceStateUpdate {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            container_status: None,
            container_id: Patch::Unchanged,
            container_ip: Patch::Unchanged,
            agent_connected: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn status(mut self, status: ContainerStatus) -> Self {
        self.container_status = Some(status);
        self
    }

    pub fn container(mut self, container_id: impl Into<String>, ip: Option<String>) -> Self {
        self.container_id = Patch::Set(container_id.into());
        self.container_ip = ip.into();
        self
    }

    /// Moves the container to `none` and clears everything that hangs off it.
    pub fn removed(mut self) -> Self {
        self.container_status = Some(ContainerStatus::None);
        self.container_id = Patch::Cleared;
        self.container_ip = Patch::Cleared;
        self.agent_connected = Some(false);
        self
    }

    pub fn agent(mut self, connected: bool) -> Self {
        self.agent_connected = Some(connected);
        self
    }

    pub fn at(mut self, emitted_at: DateTime<Utc>) -> Self {
        self.emitted_at = emitted_at;
        self
    }

    pub fn is_removal(&self) -> bool {
        self.container_status == Some(ContainerStatus::None)
    }
}

/// Newest `emitted_at` merged per workspace.
///
/// Pushes can arrive late (a delayed `running` after a `none`); anything
/// emitted before the last merged update for its workspace is stale and must
/// not be merged. Equal timestamps are admitted, so duplicates stay harmless.
#[derive(Debug, Default, Clone)]
pub struct UpdateClock {
    last: HashMap<String, DateTime<Utc>>,
}

impl UpdateClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update` as merged. Returns `false`, recording nothing, if it is stale.
    pub fn admit(&mut self, update: &WorkspaceStateUpdate) -> bool {
        match self.last.get_mut(&update.workspace_id) {
            Some(last) if update.emitted_at < *last => false,
            Some(last) => {
                *last = update.emitted_at;
                true
            }
            None => {
                self.last
                    .insert(update.workspace_id.clone(), update.emitted_at);
                true
            }
        }
    }

    pub fn last(&self, workspace_id: &str) -> Option<DateTime<Utc>> {
        self.last.get(workspace_id).copied()
    }

    pub fn forget(&mut self, workspace_id: &str) {
        self.last.remove(workspace_id);
    }
}
