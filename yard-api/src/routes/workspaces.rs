use crate::{
    auth::AuthenticatedUser,
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use yard_core::{ContainerStatus, EnvMap, EnvVarDiff, IntentState, Workspace, WorkspaceStateUpdate};
use yard_orchestrator::{AgentReport, EnvResolution, GateOutcome, OperationTicket};
use yard_store::{NewWorkspace, WorkspaceFilters};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace).delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/deploy", post(deploy_workspace))
        .route("/api/v1/workspaces/{id}/redeploy", post(redeploy_workspace))
        .route("/api/v1/workspaces/{id}/start", post(start_workspace))
        .route("/api/v1/workspaces/{id}/restart", post(restart_workspace))
        .route("/api/v1/workspaces/{id}/shutdown", post(shutdown_workspace))
        .route("/api/v1/workspaces/{id}/destroy", post(destroy_workspace))
        .route(
            "/api/v1/workspaces/{id}/env",
            get(get_live_env).put(set_live_env),
        )
        .route("/api/v1/workspaces/{id}/env/diff", get(get_env_diff))
        .route(
            "/api/v1/workspaces/{id}/intent",
            get(get_intent).delete(acknowledge_intent),
        )
        .route("/api/v1/workspaces/{id}/heartbeat", post(agent_heartbeat))
        .route("/api/v1/push", post(driver_push))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    repository_id: Option<String>,
    container_status: Option<ContainerStatus>,
}

/// Body (or query) of a destructive lifecycle call.
#[derive(Debug, Default, Deserialize)]
struct ResolutionRequest {
    resolution: Option<EnvResolution>,
}

async fn create_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<NewWorkspace>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let workspace = state.coordinator.create_workspace(&req).await?;
    info!(user = %user.username, workspace_id = %workspace.id, "workspace created via api");
    Ok((StatusCode::CREATED, Json(workspace)))
}

async fn list_workspaces(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let filters = WorkspaceFilters {
        repository_id: query.repository_id,
        container_status: query.container_status,
    };

    Ok(Json(state.coordinator.list_workspaces(&filters).await?))
}

async fn get_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(state.coordinator.get_workspace(&id).await?))
}

fn accepted(ticket: OperationTicket) -> Response {
    (StatusCode::ACCEPTED, Json(ticket)).into_response()
}

/// Map the outcome of a gated operation onto a response.
fn gated(outcome: GateOutcome) -> ApiResult<Response> {
    match outcome {
        GateOutcome::Proceeded(ticket) => Ok(accepted(ticket)),
        GateOutcome::NeedsResolution(diff) => Err(ApiError::EnvDiverged(diff)),
        GateOutcome::Cancelled => Ok(Json(json!({ "status": "cancelled" })).into_response()),
    }
}

async fn deploy_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Response> {
    info!(user = %user.username, workspace_id = %id, "deploy requested");
    Ok(accepted(state.coordinator.deploy(&id).await?))
}

async fn redeploy_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Option<Json<ResolutionRequest>>,
) -> ApiResult<Response> {
    let resolution = body.and_then(|Json(b)| b.resolution);
    info!(user = %user.username, workspace_id = %id, ?resolution, "redeploy requested");
    gated(state.coordinator.redeploy(&id, resolution).await?)
}

async fn start_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(accepted(state.coordinator.start(&id).await?))
}

async fn restart_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(accepted(state.coordinator.restart(&id).await?))
}

async fn shutdown_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(accepted(state.coordinator.shutdown(&id).await?))
}

async fn destroy_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Option<Json<ResolutionRequest>>,
) -> ApiResult<Response> {
    let resolution = body.and_then(|Json(b)| b.resolution);
    info!(user = %user.username, workspace_id = %id, ?resolution, "destroy requested");
    gated(state.coordinator.destroy(&id, resolution).await?)
}

async fn delete_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ResolutionRequest>,
) -> ApiResult<Response> {
    info!(user = %user.username, workspace_id = %id, resolution = ?query.resolution, "delete requested");
    gated(state.coordinator.delete_workspace(&id, query.resolution).await?)
}

async fn get_live_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvMap>> {
    Ok(Json(state.coordinator.read_live_env(&id).await?))
}

async fn set_live_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(env): Json<EnvMap>,
) -> ApiResult<Json<EnvMap>> {
    state.coordinator.write_live_env(&id, &env).await?;
    Ok(Json(env))
}

async fn get_env_diff(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvVarDiff>> {
    Ok(Json(state.coordinator.env_diff(&id).await?))
}

async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IntentState>> {
    // 404 for unknown workspaces rather than an idle intent.
    state.coordinator.get_workspace(&id).await?;
    Ok(Json(state.coordinator.intent(&id)))
}

async fn acknowledge_intent(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.coordinator.acknowledge_intent(&id);
    StatusCode::NO_CONTENT
}

async fn agent_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<AgentReport>>,
) -> ApiResult<Json<Workspace>> {
    let report = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.coordinator.agent_heartbeat(&id, report).await?))
}

async fn driver_push(
    State(state): State<AppState>,
    Json(update): Json<WorkspaceStateUpdate>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(state.coordinator.ingest(update).await?))
}
