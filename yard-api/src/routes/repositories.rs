use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use yard_core::{EnvMap, Repository};

use crate::error::ApiError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/repositories",
            get(list_repositories).post(create_repository),
        )
        .route(
            "/api/v1/repositories/{id}/env",
            get(get_repository_env).put(set_repository_env),
        )
}

#[derive(Debug, Deserialize)]
struct CreateRepositoryRequest {
    name: String,
    #[serde(default)]
    env: EnvMap,
}

async fn create_repository(
    State(state): State<AppState>,
    Json(req): Json<CreateRepositoryRequest>,
) -> ApiResult<(StatusCode, Json<Repository>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let repository = state.store.create_repository(&req.name, &req.env).await?;
    Ok((StatusCode::CREATED, Json(repository)))
}

async fn list_repositories(State(state): State<AppState>) -> ApiResult<Json<Vec<Repository>>> {
    Ok(Json(state.store.list_repositories().await?))
}

async fn get_repository_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvMap>> {
    Ok(Json(state.store.get_repository_env(&id).await?))
}

async fn set_repository_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(env): Json<EnvMap>,
) -> ApiResult<Json<EnvMap>> {
    state.store.set_repository_env(&id, &env).await?;
    Ok(Json(env))
}
