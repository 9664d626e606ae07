use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use yard_core::{CoreError, EnvVarDiff};
use yard_orchestrator::{CoordinatorError, EnvResolution};
use yard_provider::ProviderError;
use yard_store::StoreError;
use yard_sync::SyncError;
use yard_templates::PipelineError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// A destructive operation was stopped because the live environment
    /// differs from the repository configuration.
    EnvDiverged(EnvVarDiff),
    /// The driver or a container could not be reached.
    Upstream(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::EnvDiverged(diff) => {
                let body = json!({
                    "error": "Live environment differs from the repository configuration",
                    "diff": diff,
                    "resolutions": EnvResolution::ALL,
                });
                return (StatusCode::CONFLICT, Json(body)).into_response();
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::IntentPending { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::OperationInProgress { .. }
            | CoordinatorError::InvalidState { .. }
            | CoordinatorError::NoContainer(_) => ApiError::Conflict(err.to_string()),
            CoordinatorError::Validation(msg) => ApiError::BadRequest(msg),
            CoordinatorError::EnvDiff { .. } => ApiError::Upstream(err.to_string()),
            CoordinatorError::Core(e) => e.into(),
            CoordinatorError::Store(e) => e.into(),
            CoordinatorError::Sync(SyncError::UnknownWorkspace(id)) => {
                ApiError::NotFound(format!("Workspace not found: {id}"))
            }
            CoordinatorError::Sync(e) => ApiError::Internal(e.to_string()),
            CoordinatorError::Provider(e) => e.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::JobActive(_)
            | PipelineError::InvalidState { .. }
            | PipelineError::HasChildren { .. } => ApiError::Conflict(err.to_string()),
            PipelineError::Validation(_)
            | PipelineError::UnknownStack(_)
            | PipelineError::StackInherited(_)
            | PipelineError::StackRequired { .. } => ApiError::BadRequest(err.to_string()),
            PipelineError::Store(e) => e.into(),
            PipelineError::Provider(e) => e.into(),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::UnknownWorkspace(id) => {
                ApiError::NotFound(format!("Workspace not found: {id}"))
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
