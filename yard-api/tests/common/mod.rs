//! Common test utilities and helpers for yard-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tower::ServiceExt;
use yard_api::{create_app, AppState, Config};
use yard_core::{EnvMap, Repository, Workspace};
use yard_provider::mock::MockDriver;
use yard_store::{NewWorkspace, Store};
use yard_templates::StackCatalog;

pub const USER: &str = "alice";

/// Router over an in-memory store and the mock driver.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub driver: MockDriver,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Store::open_in_memory()
            .await
            .expect("Failed to create in-memory store");
        let driver = MockDriver::new();
        let state = AppState::new(
            store,
            Arc::new(driver.clone()),
            Arc::new(driver.clone()),
            StackCatalog::builtin().expect("builtin catalog"),
            &Config::default(),
        );

        Self {
            app: create_app(state.clone()),
            state,
            driver,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-yard-user", USER)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-yard-user", USER)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .header("x-yard-user", USER)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        self.with_json("POST", uri, body).await
    }

    pub async fn put<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        self.with_json("PUT", uri, body).await
    }

    async fn with_json<T: serde::Serialize>(
        &self,
        method: &str,
        uri: &str,
        body: &T,
    ) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-yard-user", USER)
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    /// Fixture: a repository with `PORT=3000` and one workspace on it.
    pub async fn fixture_workspace(&self) -> Workspace {
        let mut env = EnvMap::new();
        env.insert("PORT".to_string(), "3000".to_string());
        let repository: Repository = self
            .state
            .store
            .create_repository("web", &env)
            .await
            .expect("Failed to create fixture repository");

        self.state
            .coordinator
            .create_workspace(&NewWorkspace {
                repository_id: repository.id,
                name: "login".to_string(),
                branch_name: "feature/login".to_string(),
            })
            .await
            .expect("Failed to create fixture workspace")
    }

    /// Deploy the workspace and report the agent up, leaving it running.
    pub async fn deploy_running(&self, workspace_id: &str) {
        self.state
            .coordinator
            .deploy(workspace_id)
            .await
            .expect("deploy should be accepted");
        self.wait_idle(workspace_id).await;
        self.state
            .coordinator
            .agent_heartbeat(workspace_id, Default::default())
            .await
            .expect("heartbeat should apply");
    }

    pub async fn wait_idle(&self, workspace_id: &str) {
        timeout(Duration::from_secs(5), async {
            while self
                .state
                .coordinator
                .in_flight_operation(workspace_id)
                .is_some()
            {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("operation did not finish");
    }

    pub async fn wait_template_idle(&self, template_id: &str) {
        timeout(Duration::from_secs(5), async {
            while self.state.pipeline.is_active(template_id) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("provisioning did not finish");
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}
