//! Optimistic operation intent.
//!
//! An intent is recorded before a deploy or redeploy is issued and is only
//! resolved by an observed container status, never by a request being
//! acknowledged. Transition table:
//!
//! | from                | event                      | to                     |
//! |---------------------|----------------------------|------------------------|
//! | Idle / Resolved     | begin(op)                  | Pending(op)            |
//! | Pending             | begin(_)                   | rejected               |
//! | any                 | supersede(op)              | Pending(op)            |
//! | Pending(op)         | observe(running)           | Resolved(op, Ready)    |
//! | Pending(op)         | observe(error)             | Resolved(op, Failed)   |
//! | Pending(op)         | observe(other)             | Pending(op)            |
//! | Pending             | rollback                   | Idle                   |
//! | Pending(op)         | expire (older than limit)  | Resolved(op, Stalled)  |
//! | Resolved            | acknowledge                | Idle                   |

use crate::error::{CoreError, Result};
use crate::workspace::ContainerStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentOp {
    Deploy,
    Redeploy,
}

text_enum!(IntentOp, "intent op" {
    Deploy => "deploy",
    Redeploy => "redeploy",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentOutcome {
    Ready,
    Failed,
    /// No terminal status arrived in time. Surfaced to the user, not retried.
    Stalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum IntentState {
    #[default]
    Idle,
    Pending {
        op: IntentOp,
        since: DateTime<Utc>,
    },
    Resolved {
        op: IntentOp,
        outcome: IntentOutcome,
    },
}

impl IntentState {
    pub fn is_pending(&self) -> bool {
        matches!(self, IntentState::Pending { .. })
    }

    pub fn begin(&self, op: IntentOp, at: DateTime<Utc>) -> Option<IntentState> {
        match self {
            IntentState::Pending { .. } => None,
            IntentState::Idle | IntentState::Resolved { .. } => {
                Some(IntentState::Pending { op, since: at })
            }
        }
    }

    pub fn observe(&self, status: ContainerStatus) -> IntentState {
        match (self, status) {
            (IntentState::Pending { op, .. }, ContainerStatus::Running) => IntentState::Resolved {
                op: *op,
                outcome: IntentOutcome::Ready,
            },
            (IntentState::Pending { op, .. }, ContainerStatus::Error) => IntentState::Resolved {
                op: *op,
                outcome: IntentOutcome::Failed,
            },
            (state, _) => *state,
        }
    }

    pub fn rollback(&self) -> IntentState {
        match self {
            IntentState::Pending { .. } => IntentState::Idle,
            other => *other,
        }
    }

    pub fn expire(&self, now: DateTime<Utc>, limit: Duration) -> IntentState {
        match self {
            IntentState::Pending { op, since } if now - *since >= limit => IntentState::Resolved {
                op: *op,
                outcome: IntentOutcome::Stalled,
            },
            other => *other,
        }
    }
}

/// Intent per workspace id.
#[derive(Debug, Default, Clone)]
pub struct IntentTable {
    entries: HashMap<String, IntentState>,
}

impl IntentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, workspace_id: &str) -> IntentState {
        self.entries.get(workspace_id).copied().unwrap_or_default()
    }

    pub fn begin(&mut self, workspace_id: &str, op: IntentOp, at: DateTime<Utc>) -> Result<()> {
        let current = self.get(workspace_id);
        if let IntentState::Pending { op: pending, .. } = current {
            return Err(CoreError::IntentPending {
                workspace_id: workspace_id.to_string(),
                op: pending.to_string(),
            });
        }
        if let Some(next) = current.begin(op, at) {
            self.entries.insert(workspace_id.to_string(), next);
        }
        Ok(())
    }

    /// Begin `op` whatever is pending. Returns the replaced state so a caller
    /// that gives up can [`IntentTable::restore`] it.
    pub fn supersede(&mut self, workspace_id: &str, op: IntentOp, at: DateTime<Utc>) -> IntentState {
        let previous = self.get(workspace_id);
        self.entries
            .insert(workspace_id.to_string(), IntentState::Pending { op, since: at });
        previous
    }

    pub fn restore(&mut self, workspace_id: &str, previous: IntentState) {
        match previous {
            IntentState::Idle => {
                self.entries.remove(workspace_id);
            }
            state => {
                self.entries.insert(workspace_id.to_string(), state);
            }
        }
    }

    /// Feed an observed container status. Returns the outcome if this resolved a pending intent.
    pub fn observe(&mut self, workspace_id: &str, status: ContainerStatus) -> Option<IntentOutcome> {
        let current = self.get(workspace_id);
        let next = current.observe(status);
        if next == current {
            return None;
        }
        self.entries.insert(workspace_id.to_string(), next);
        match next {
            IntentState::Resolved { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub fn rollback(&mut self, workspace_id: &str) {
        if let Some(state) = self.entries.get_mut(workspace_id) {
            *state = state.rollback();
        }
    }

    /// Clear a resolved intent once its outcome has been shown.
    pub fn acknowledge(&mut self, workspace_id: &str) {
        if matches!(self.get(workspace_id), IntentState::Resolved { .. }) {
            self.entries.remove(workspace_id);
        }
    }

    pub fn remove(&mut self, workspace_id: &str) {
        self.entries.remove(workspace_id);
    }

    /// Resolve every pending intent older than `limit` as stalled.
    pub fn expire(&mut self, now: DateTime<Utc>, limit: Duration) -> Vec<(String, IntentOp)> {
        let mut stalled = Vec::new();
        for (workspace_id, state) in self.entries.iter_mut() {
            let next = state.expire(now, limit);
            if next != *state {
                if let IntentState::Resolved { op, .. } = next {
                    stalled.push((workspace_id.clone(), op));
                }
                *state = next;
            }
        }
        stalled.sort();
        stalled
    }
}
