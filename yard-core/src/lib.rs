//! Shared data model for yard.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: workspaces and the partial updates pushed for them, templates, the
//! environment divergence computed before destructive operations, and the
//! optimistic intent state machine used by both the coordinator and clients.

#[macro_use]
mod macros;

pub mod env;
pub mod error;
pub mod intent;
pub mod repository;
pub mod template;
pub mod workspace;

pub use env::{parse_dotenv, render_dotenv, ChangedValue, EnvMap, EnvVarDiff};
pub use error::{CoreError, Result};
pub use intent::{IntentOp, IntentOutcome, IntentState, IntentTable};
pub use repository::Repository;
pub use template::{Template, TemplateSource, TemplateStatus};
pub use workspace::{
    ContainerStatus, MergeOutcome, Patch, UpdateClock, Workspace, WorkspaceStateUpdate,
    WorkspaceStatus,
};
