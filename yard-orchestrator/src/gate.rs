use serde::{Deserialize, Serialize};
use yard_core::EnvVarDiff;

use crate::OperationTicket;

/// How the caller wants a diverged environment handled before a destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvResolution {
    /// Copy the live `.env` into the repository configuration, then continue.
    SyncThenProceed,
    /// Continue and lose the live changes.
    ProceedWithoutSync,
    Cancel,
}

impl EnvResolution {
    pub const ALL: [EnvResolution; 3] = [
        EnvResolution::SyncThenProceed,
        EnvResolution::ProceedWithoutSync,
        EnvResolution::Cancel,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Proceeded(OperationTicket),
    /// The live environment diverged and no resolution was given. Nothing was started.
    NeedsResolution(EnvVarDiff),
    Cancelled,
}
