use thiserror::Error;
use yard_core::TemplateStatus;
use yard_provider::ProviderError;
use yard_store::StoreError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("A provisioning job is already running for template {0}")]
    JobActive(String),

    #[error("Template {id} is {status}: {hint}")]
    InvalidState {
        id: String,
        status: TemplateStatus,
        hint: &'static str,
    },

    #[error("Template {id} is used as the parent of: {}", children.join(", "))]
    HasChildren { id: String, children: Vec<String> },

    #[error("Invalid template: {0}")]
    Validation(String),

    #[error("Unknown tech stack: {0}")]
    UnknownStack(String),

    #[error("Tech stack {0} is inherited from the parent template")]
    StackInherited(String),

    #[error("Tech stack {stack} is required by: {}", dependents.join(", "))]
    StackRequired {
        stack: String,
        dependents: Vec<String>,
    },

    #[error("Tech stack catalog is invalid: {0}")]
    Catalog(String),

    #[error("Failed to parse tech stack catalog: {0}")]
    CatalogParse(#[from] serde_yaml_ng::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn invalid_state(
        id: impl Into<String>,
        status: TemplateStatus,
        hint: &'static str,
    ) -> Self {
        PipelineError::InvalidState {
            id: id.into(),
            status,
            hint,
        }
    }
}
