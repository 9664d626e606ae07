use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use yard_store::Operation;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/operations", get(list_operations))
        .route("/api/v1/operations/{id}", get(get_operation))
}

#[derive(Debug, Deserialize)]
struct OperationsQuery {
    workspace_id: Option<String>,
}

async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Vec<Operation>>> {
    let operations = state
        .coordinator
        .list_operations(query.workspace_id.as_deref())
        .await?;

    Ok(Json(operations))
}

async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Operation>> {
    Ok(Json(state.store.get_operation(&id).await?))
}
