//! HTTP client for the worker contract.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::WorkerEndpoint;
use crate::error::DispatchError;
use crate::protocol::{
    CancelResponse, HealthResponse, TaskRequest, TaskResultResponse, WorkerStatusResponse,
};

/// Thin typed wrapper over `reqwest`. Knows nothing about pool state.
#[derive(Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(request_timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DispatchError::Network {
                worker_id: "*".to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }

    /// `POST /task`. 202 is success, 409 is `Busy`.
    pub async fn submit(
        &self,
        worker: &WorkerEndpoint,
        req: &TaskRequest,
    ) -> Result<(), DispatchError> {
        let resp = self
            .http
            .post(format!("{}/task", worker.url))
            .json(req)
            .send()
            .await
            .map_err(|e| network(worker, e))?;

        match resp.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(DispatchError::Busy {
                worker_id: worker.id.clone(),
            }),
            status => Err(unexpected(worker, status, resp).await),
        }
    }

    /// `GET /task/{id}/result`. 404 is `UnknownTask`.
    pub async fn result(
        &self,
        worker: &WorkerEndpoint,
        task_id: &str,
    ) -> Result<TaskResultResponse, DispatchError> {
        let resp = self
            .http
            .get(format!("{}/task/{task_id}/result", worker.url))
            .send()
            .await
            .map_err(|e| network(worker, e))?;

        match resp.status() {
            StatusCode::OK => decode(worker, resp).await,
            StatusCode::NOT_FOUND => Err(DispatchError::UnknownTask {
                task_id: task_id.to_string(),
                worker_id: worker.id.clone(),
            }),
            status => Err(unexpected(worker, status, resp).await),
        }
    }

    /// `POST /task/{id}/cancel`.
    pub async fn cancel(
        &self,
        worker: &WorkerEndpoint,
        task_id: &str,
    ) -> Result<CancelResponse, DispatchError> {
        let resp = self
            .http
            .post(format!("{}/task/{task_id}/cancel", worker.url))
            .send()
            .await
            .map_err(|e| network(worker, e))?;

        match resp.status() {
            StatusCode::OK => decode(worker, resp).await,
            StatusCode::NOT_FOUND => Err(DispatchError::UnknownTask {
                task_id: task_id.to_string(),
                worker_id: worker.id.clone(),
            }),
            status => Err(unexpected(worker, status, resp).await),
        }
    }

    /// `GET /health` with its own, usually shorter, timeout.
    pub async fn health(
        &self,
        worker: &WorkerEndpoint,
        timeout: Duration,
    ) -> Result<HealthResponse, DispatchError> {
        let resp = self
            .http
            .get(format!("{}/health", worker.url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| network(worker, e))?;

        match resp.status() {
            StatusCode::OK => decode(worker, resp).await,
            status => Err(unexpected(worker, status, resp).await),
        }
    }

    /// `GET /status`.
    pub async fn status(
        &self,
        worker: &WorkerEndpoint,
        timeout: Duration,
    ) -> Result<WorkerStatusResponse, DispatchError> {
        let resp = self
            .http
            .get(format!("{}/status", worker.url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| network(worker, e))?;

        match resp.status() {
            StatusCode::OK => decode(worker, resp).await,
            status => Err(unexpected(worker, status, resp).await),
        }
    }
}

fn network(worker: &WorkerEndpoint, e: reqwest::Error) -> DispatchError {
    DispatchError::Network {
        worker_id: worker.id.clone(),
        reason: e.to_string(),
    }
}

async fn unexpected(
    worker: &WorkerEndpoint,
    status: StatusCode,
    resp: reqwest::Response,
) -> DispatchError {
    let body = resp.text().await.unwrap_or_default();
    DispatchError::UnexpectedStatus {
        worker_id: worker.id.clone(),
        status: status.as_u16(),
        body,
    }
}

async fn decode<T: DeserializeOwned>(
    worker: &WorkerEndpoint,
    resp: reqwest::Response,
) -> Result<T, DispatchError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| network(worker, e))?;
    serde_json::from_str(&body).map_err(|e| DispatchError::UnexpectedStatus {
        worker_id: worker.id.clone(),
        status: status.as_u16(),
        body: format!("undecodable body ({e}): {body}"),
    })
}
