use std::path::PathBuf;
use thiserror::Error;
use yard_core::CoreError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// An update arrived for a workspace this client has never seen. The
    /// caller should refetch rather than invent a record.
    #[error("Unknown workspace: {0}")]
    UnknownWorkspace(String),

    #[error("Workspace {0} has no container")]
    NoContainer(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid selection file {path}: {source}")]
    SelectionFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
