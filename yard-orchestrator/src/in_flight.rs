use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use yard_store::OperationType;

/// Which workspaces have an operation running, and which one.
#[derive(Clone, Default)]
pub(crate) struct InFlight {
    ops: Arc<Mutex<HashMap<String, OperationType>>>,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, OperationType>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the workspace. On conflict returns the operation already running.
    pub(crate) fn claim(
        &self,
        workspace_id: &str,
        operation: OperationType,
    ) -> Result<InFlightGuard, OperationType> {
        let mut ops = self.lock();
        if let Some(running) = ops.get(workspace_id) {
            return Err(*running);
        }
        ops.insert(workspace_id.to_string(), operation);
        Ok(InFlightGuard {
            in_flight: self.clone(),
            workspace_id: workspace_id.to_string(),
        })
    }

    pub(crate) fn current(&self, workspace_id: &str) -> Option<OperationType> {
        self.lock().get(workspace_id).copied()
    }
}

/// Releases the workspace when dropped.
pub(crate) struct InFlightGuard {
    in_flight: InFlight,
    workspace_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.workspace_id);
    }
}
