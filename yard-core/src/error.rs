use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid .env line {line}: {content}")]
    InvalidDotenvLine { line: usize, content: String },

    #[error("Update for workspace {got} applied to workspace {expected}")]
    WorkspaceMismatch { expected: String, got: String },

    #[error("Workspace {workspace_id} already has a pending {op} intent")]
    IntentPending { workspace_id: String, op: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
