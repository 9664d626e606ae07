pub mod health;
pub mod operations;
pub mod repositories;
pub mod templates;
pub mod workspaces;
pub mod ws;

use crate::{auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_app(state: AppState) -> Router {
    // Allow CORS for local development (frontend on different port)
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(
            repositories::routes()
                .merge(workspaces::routes())
                .merge(operations::routes())
                .merge(templates::routes())
                .merge(ws::routes())
                .layer(middleware::from_fn(auth_middleware)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
