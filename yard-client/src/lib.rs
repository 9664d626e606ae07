//! Client reconciliation layer.
//!
//! Keeps a local copy of workspace state in step with pushed
//! [`WorkspaceStateUpdate`](yard_core::WorkspaceStateUpdate)s, tracks
//! optimistic intents the same way the coordinator does, and restores the
//! user's last selection only after checking it against freshly fetched state.

pub mod error;
pub mod selection;
pub mod state;

pub use error::{ClientError, Result};
pub use selection::{Selection, SelectionFile};
pub use state::{BatchReport, ClientState, Fetched, Notice, NoticeKind, Tab, TabKind};
