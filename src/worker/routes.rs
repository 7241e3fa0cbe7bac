//! Worker HTTP surface.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use super::executor::TaskExecutor;
use crate::error::TaskError;
use crate::protocol::{AcceptResponse, ErrorResponse, HealthResponse, TaskRequest};

/// Build the worker routes.
pub fn worker_routes(executor: TaskExecutor) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/task/{id}/result", get(task_result))
        .route("/task/{id}/cancel", post(cancel_task))
        .route("/task/{id}/events", get(task_events))
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(executor)
}

/// POST /task
///
/// 202 when accepted (or already known), 409 when busy, 400 on a bad body.
async fn submit_task(
    State(executor): State<TaskExecutor>,
    body: Result<Json<TaskRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(AcceptResponse::rejected(rejection.body_text())),
            )
                .into_response();
        }
    };

    let task_id = req.task_id.clone();
    match executor.accept(req).await {
        Ok(_) => (StatusCode::ACCEPTED, Json(AcceptResponse::accepted(&task_id))).into_response(),
        Err(TaskError::Busy { current }) => {
            (StatusCode::CONFLICT, Json(AcceptResponse::busy(&current))).into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(AcceptResponse::rejected(e.to_string())),
        )
            .into_response(),
    }
}

/// GET /task/{id}/result
async fn task_result(State(executor): State<TaskExecutor>, Path(id): Path<String>) -> Response {
    match executor.result(&id).await {
        Some(body) => Json(body).into_response(),
        None => not_found(&id),
    }
}

/// POST /task/{id}/cancel
async fn cancel_task(State(executor): State<TaskExecutor>, Path(id): Path<String>) -> Response {
    match executor.cancel(&id).await {
        Ok(body) => Json(body).into_response(),
        Err(_) => not_found(&id),
    }
}

/// GET /task/{id}/events
async fn task_events(State(executor): State<TaskExecutor>, Path(id): Path<String>) -> Response {
    match executor.events(&id).await {
        Some(events) => Json(events).into_response(),
        None => not_found(&id),
    }
}

async fn health(State(executor): State<TaskExecutor>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        worker_id: executor.worker_id().to_string(),
        current_task: executor.current_task().await,
    })
}

async fn status(State(executor): State<TaskExecutor>) -> impl IntoResponse {
    Json(executor.status().await)
}

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("task {id} not found"))),
    )
        .into_response()
}
