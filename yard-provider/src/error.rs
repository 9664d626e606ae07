use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("{operation} failed: {message}")]
    CommandFailed { operation: String, message: String },

    #[error("Driver unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn command(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::CommandFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
