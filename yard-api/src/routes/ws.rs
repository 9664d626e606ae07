//! WebSocket push channels.
//!
//! Every message is one JSON text frame: a `SubscriptionEvent` on the
//! workspace channel, a `ProvisionEvent` on the template channel.

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{stream::BoxStream, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use yard_sync::SubscriptionEvent;
use yard_templates::ProvisionEvent;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/ws/workspaces", get(workspace_updates))
        .route("/api/v1/ws/templates/{id}", get(template_events))
}

#[derive(Debug, Deserialize)]
struct WorkspacesQuery {
    /// Comma-separated workspace ids.
    ids: String,
}

async fn workspace_updates(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WorkspacesQuery>,
) -> ApiResult<Response> {
    let ids: Vec<&str> = query
        .ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        return Err(ApiError::BadRequest("ids must name at least one workspace".to_string()));
    }

    // Subscribe before upgrading so unknown ids fail as a plain HTTP error.
    let subscription = state.synchronizer().subscribe(&ids)?;
    Ok(ws.on_upgrade(move |socket| forward(socket, subscription, never_last)))
}

async fn template_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    state.pipeline.get(&id).await?;
    let events: BoxStream<'static, ProvisionEvent> = state
        .pipeline
        .subscribe(&id)
        .ok_or_else(|| ApiError::NotFound(format!("No provisioning job running for template {id}")))?;

    Ok(ws.on_upgrade(move |socket| forward(socket, events, ProvisionEvent::is_terminal)))
}

/// Workspace streams end only when the workspace is forgotten.
fn never_last(_: &SubscriptionEvent) -> bool {
    false
}

/// Pump `events` into the socket until the stream ends, `last` matches, or
/// the client goes away.
async fn forward<S, T>(socket: WebSocket, mut events: S, last: fn(&T) -> bool)
where
    S: Stream<Item = T> + Unpin + Send + 'static,
    T: Serialize + Send + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode push event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            if last(&event) {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!("push channel closed");
}
