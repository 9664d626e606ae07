use serde::{Deserialize, Serialize};
use yard_core::TemplateStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionPhase {
    Clone,
    Install,
    Agent,
    Finalize,
}

/// One event of a provisioning job. Every job ends with exactly one
/// `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProvisionEvent {
    Progress {
        phase: ProvisionPhase,
        step: usize,
        total: usize,
        message: String,
    },
    Complete {
        status: TemplateStatus,
    },
    Error {
        message: String,
    },
}

impl ProvisionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProvisionEvent::Progress { .. })
    }
}
