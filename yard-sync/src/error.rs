use thiserror::Error;
use yard_core::CoreError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Workspace is not tracked: {0}")]
    UnknownWorkspace(String),

    #[error(transparent)]
    Merge(#[from] CoreError),
}
