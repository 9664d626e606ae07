use thiserror::Error;
use yard_core::{ContainerStatus, CoreError};
use yard_provider::ProviderError;
use yard_store::{OperationType, StoreError};
use yard_sync::SyncError;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Operation in progress on workspace {workspace_id}: {operation}")]
    OperationInProgress {
        workspace_id: String,
        operation: OperationType,
    },

    #[error("Cannot {operation} workspace {workspace_id} while its container is {status}")]
    InvalidState {
        workspace_id: String,
        operation: OperationType,
        status: ContainerStatus,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Workspace {0} has no container")]
    NoContainer(String),

    /// The environment divergence could not be computed, so a destructive
    /// operation cannot be allowed through.
    #[error("Could not compare environment for workspace {workspace_id}: {message}")]
    EnvDiff {
        workspace_id: String,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
