//! Workspace lifecycle coordination.
//!
//! The [`Coordinator`] accepts lifecycle operations (deploy, redeploy, start,
//! restart, shutdown, destroy, delete), allows at most one at a time per
//! workspace, and runs the driver work in the background. Operations that
//! throw a container away are gated on the difference between the live
//! `.env` and the repository's stored configuration. Deploys carry an
//! optimistic intent that only an observed `running` or `error` status
//! resolves.

mod coordinator;
pub mod error;
mod gate;
mod in_flight;

pub use coordinator::{AgentReport, Coordinator, CoordinatorConfig, OperationTicket};
pub use error::{CoordinatorError, Result};
pub use gate::{EnvResolution, GateOutcome};
