//! Master HTTP API.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::orchestrator::Orchestrator;
use crate::protocol::ErrorResponse;

/// `POST /objective` body.
#[derive(Debug, Deserialize)]
pub struct ObjectiveRequest {
    pub objective: String,
    #[serde(default)]
    pub context: Option<String>,
}

/// Build the master routes.
pub fn master_routes(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/objective", post(submit_objective))
        .route("/workers", get(list_workers))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// POST /objective
///
/// Plans and runs the objective, answering with the full report once done.
async fn submit_objective(
    State(orchestrator): State<Arc<Orchestrator>>,
    body: Result<Json<ObjectiveRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) if !req.objective.trim().is_empty() => req,
        Ok(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("objective must not be empty")),
            )
                .into_response();
        }
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(rejection.body_text())),
            )
                .into_response();
        }
    };
    let report = orchestrator
        .run_objective(&req.objective, req.context.as_deref())
        .await;
    Json(report).into_response()
}

/// GET /workers
async fn list_workers(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    Json(orchestrator.pool().status_summary().await)
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let summary = orchestrator.pool().status_summary().await;
    Json(serde_json::json!({
        "status": "healthy",
        "role": "master",
        "workers": summary.total,
        "idle": summary.idle,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::MasterConfig;
    use crate::master::pool::WorkerPool;
    use crate::test_support::{ScriptedLlm, text_step};

    fn app(root: &std::path::Path) -> Router {
        let config = MasterConfig {
            workspace_root: root.to_path_buf(),
            ..MasterConfig::default()
        };
        let pool = Arc::new(WorkerPool::new(config.pool.clone()).unwrap());
        let llm = Arc::new(ScriptedLlm::repeating(text_step("hello")));
        master_routes(Arc::new(Orchestrator::new(config, llm, pool)))
    }

    #[tokio::test]
    async fn empty_objective_is_400() {
        let root = tempfile::tempdir().unwrap();
        let resp = app(root.path())
            .oneshot(
                Request::post("/objective")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"objective":"   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn workers_summary_is_served() {
        let root = tempfile::tempdir().unwrap();
        let resp = app(root.path())
            .oneshot(Request::get("/workers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["total"], 0);
    }
}
