use crate::{error::ApiResult, state::AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use yard_core::Template;
use yard_templates::{
    CloneTemplate, JobProgress, NewTemplate, ProvisionOptions, StackChanges, TechStack,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/stacks", get(list_stacks))
        .route(
            "/api/v1/templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/api/v1/templates/{id}",
            get(get_template).delete(delete_template),
        )
        .route("/api/v1/templates/{id}/provision", post(provision_template))
        .route("/api/v1/templates/{id}/recreate", post(recreate_template))
        .route("/api/v1/templates/{id}/finalize", post(finalize_template))
        .route("/api/v1/templates/{id}/clone", post(clone_template))
        .route("/api/v1/templates/{id}/default", post(set_default_template))
        .route(
            "/api/v1/templates/{id}/stacks",
            axum::routing::put(update_stacks),
        )
        .route("/api/v1/templates/{id}/progress", get(get_progress))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressResponse {
    active: bool,
    progress: Option<JobProgress>,
    last_error: Option<String>,
}

async fn list_stacks(State(state): State<AppState>) -> Json<Vec<TechStack>> {
    Json(state.pipeline.catalog().list().cloned().collect())
}

async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<NewTemplate>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    let template = state.pipeline.create(req).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn list_templates(State(state): State<AppState>) -> ApiResult<Json<Vec<Template>>> {
    Ok(Json(state.pipeline.list().await?))
}

async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.pipeline.get(&id).await?))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.pipeline.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn job_started(id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "templateId": id, "status": "provisioning" })),
    )
}

async fn provision_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ProvisionOptions>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    state.pipeline.start_provision(&id, options).await?;
    Ok(job_started(&id))
}

async fn recreate_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ProvisionOptions>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    state.pipeline.start_recreate(&id, options).await?;
    Ok(job_started(&id))
}

async fn finalize_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    let template = state.pipeline.finalize(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(template)))
}

async fn clone_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CloneTemplate>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    let template = state.pipeline.clone_template(&id, req).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn set_default_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.pipeline.set_default(&id).await?))
}

async fn update_stacks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(changes): Json<StackChanges>,
) -> ApiResult<Json<Template>> {
    Ok(Json(state.pipeline.update_stacks(&id, changes).await?))
}

async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProgressResponse>> {
    state.pipeline.get(&id).await?;
    Ok(Json(ProgressResponse {
        active: state.pipeline.is_active(&id),
        progress: state.pipeline.progress(&id),
        last_error: state.pipeline.last_error(&id),
    }))
}
