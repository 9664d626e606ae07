use crate::error::{Result, SyncError};
use crate::subscription::Subscription;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use yard_core::{MergeOutcome, Workspace, WorkspaceStateUpdate};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Updates buffered per workspace before a slow subscriber is marked lagged.
    pub channel_capacity: usize,
    /// Silence after which a workspace's agent is considered disconnected.
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            heartbeat_timeout: Duration::from_secs(45),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

struct Entry {
    workspace: Workspace,
    tx: broadcast::Sender<WorkspaceStateUpdate>,
    last_heartbeat: Option<DateTime<Utc>>,
    /// `emitted_at` of the newest merged update.
    last_emitted: Option<DateTime<Utc>>,
}

impl Entry {
    /// Merge then fan out. Called with the entries lock held so the canonical
    /// state and every subscriber see the same order.
    /// Updates emitted before the newest merged one are dropped unseen.
    fn publish(&mut self, update: WorkspaceStateUpdate) -> Result<MergeOutcome> {
        if self.last_emitted.is_some_and(|last| update.emitted_at < last) {
            debug!(workspace_id = %self.workspace.id, emitted_at = %update.emitted_at, "stale update dropped");
            return Ok(MergeOutcome::default());
        }
        let outcome = self.workspace.apply_update(&update)?;
        self.last_emitted = Some(update.emitted_at);

        if update.agent_connected == Some(true) {
            let at = self.last_heartbeat.map_or(update.emitted_at, |t| t.max(update.emitted_at));
            self.last_heartbeat = Some(at);
        }

        if outcome.changed {
            // No receivers is fine: nobody is watching this workspace right now.
            let _ = self.tx.send(update);
        } else {
            debug!(workspace_id = %self.workspace.id, "update changed nothing, not fanned out");
        }

        Ok(outcome)
    }

    /// When the agent was last heard from, falling back to when it first connected.
    fn last_contact(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat.or(self.workspace.agent_connected_at)
    }
}

#[derive(Clone)]
pub struct Synchronizer {
    config: Arc<SyncConfig>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config: Arc::new(config),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a workspace, or replace its canonical state.
    ///
    /// Existing subscribers are kept; replacing state does not notify them.
    pub fn track(&self, workspace: Workspace) {
        let mut entries = self.lock();
        match entries.get_mut(&workspace.id) {
            Some(entry) => entry.workspace = workspace,
            None => {
                let (tx, _) = broadcast::channel(self.config.channel_capacity.max(1));
                entries.insert(
                    workspace.id.clone(),
                    Entry {
                        workspace,
                        tx,
                        last_heartbeat: None,
                        last_emitted: None,
                    },
                );
            }
        }
    }

    /// Stop tracking a workspace. Its part of every subscription ends.
    pub fn forget(&self, workspace_id: &str) -> Option<Workspace> {
        self.lock().remove(workspace_id).map(|entry| entry.workspace)
    }

    pub fn is_tracked(&self, workspace_id: &str) -> bool {
        self.lock().contains_key(workspace_id)
    }

    pub fn snapshot(&self, workspace_id: &str) -> Option<Workspace> {
        self.lock().get(workspace_id).map(|e| e.workspace.clone())
    }

    /// Every tracked workspace, oldest first.
    pub fn snapshot_all(&self) -> Vec<Workspace> {
        let mut all: Vec<Workspace> = self.lock().values().map(|e| e.workspace.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Fold `update` into the canonical state and push it to subscribers.
    ///
    /// Returns the merged workspace alongside what the merge did.
    pub fn publish(&self, update: WorkspaceStateUpdate) -> Result<(Workspace, MergeOutcome)> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(&update.workspace_id)
            .ok_or_else(|| SyncError::UnknownWorkspace(update.workspace_id.clone()))?;
        let outcome = entry.publish(update)?;
        Ok((entry.workspace.clone(), outcome))
    }

    /// Subscribe to updates for the given workspaces. Unknown ids are rejected.
    pub fn subscribe<S: AsRef<str>>(&self, workspace_ids: &[S]) -> Result<Subscription> {
        let entries = self.lock();
        let mut receivers = Vec::with_capacity(workspace_ids.len());

        for id in workspace_ids {
            let id = id.as_ref();
            if receivers.iter().any(|(seen, _)| seen == id) {
                continue;
            }
            let entry = entries
                .get(id)
                .ok_or_else(|| SyncError::UnknownWorkspace(id.to_string()))?;
            receivers.push((id.to_string(), entry.tx.subscribe()));
        }

        Ok(Subscription::new(receivers))
    }

    pub fn subscriber_count(&self, workspace_id: &str) -> usize {
        self.lock()
            .get(workspace_id)
            .map_or(0, |e| e.tx.receiver_count())
    }

    /// Record agent contact. The first heartbeat after a disconnect publishes
    /// `agentConnected = true`; returns whether it did.
    pub fn heartbeat(&self, workspace_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(workspace_id)
            .ok_or_else(|| SyncError::UnknownWorkspace(workspace_id.to_string()))?;

        entry.last_heartbeat = Some(entry.last_heartbeat.map_or(at, |t| t.max(at)));

        if entry.workspace.agent_connected() || !entry.workspace.has_container() {
            return Ok(false);
        }

        let outcome = entry.publish(WorkspaceStateUpdate::new(workspace_id).agent(true).at(at))?;
        if outcome.changed {
            info!(workspace_id, "agent connected");
        }
        Ok(outcome.changed)
    }

    /// Mark agents silent for longer than `threshold` as disconnected.
    ///
    /// Only `agentConnected` is touched; container status is left alone.
    /// Returns the ids that were downgraded, sorted.
    pub fn sweep_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<String> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let mut entries = self.lock();
        let mut downgraded = Vec::new();

        for (workspace_id, entry) in entries.iter_mut() {
            if !entry.workspace.agent_connected() {
                continue;
            }
            let stale = entry
                .last_contact()
                .map_or(true, |last| now.signed_duration_since(last) > threshold);
            if !stale {
                continue;
            }

            let update = WorkspaceStateUpdate::new(workspace_id.as_str())
                .agent(false)
                .at(now);
            match entry.publish(update) {
                Ok(_) => downgraded.push(workspace_id.clone()),
                Err(e) => warn!(workspace_id = %workspace_id, error = %e, "failed to downgrade agent"),
            }
        }

        downgraded.sort();
        downgraded
    }
}
