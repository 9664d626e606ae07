//! Workspace state synchronizer.
//!
//! Holds the canonical container state of every tracked workspace and pushes
//! each accepted [`WorkspaceStateUpdate`](yard_core::WorkspaceStateUpdate) to
//! the subscribers of that workspace. Updates for one workspace reach every
//! subscriber in the order they were published; there is no ordering across
//! workspaces. Nothing is replayed on subscribe: a consumer that reconnects,
//! or sees a [`SubscriptionEvent::Lagged`] marker, refetches full state.

pub mod error;
mod subscription;
mod synchronizer;

pub use error::{Result, SyncError};
pub use subscription::{Subscription, SubscriptionEvent};
pub use synchronizer::{SyncConfig, Synchronizer};
