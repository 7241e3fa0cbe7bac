//! Worker HTTP wire types, shared by the worker routes and the master client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// Task ids travel in URL paths, so they are limited to `[A-Za-z0-9_-]+`.
pub fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// `POST /task` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Worker-side TTL; the worker default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Background the agent should see (e.g. results of earlier subtasks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Accept/busy status on `POST /task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptStatus {
    Accepted,
    Busy,
    Rejected,
}

/// `POST /task` response: 202 accepted, 409 busy, 400 rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub success: bool,
    pub status: AcceptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// On 409, the task currently occupying the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AcceptResponse {
    pub fn accepted(task_id: &str) -> Self {
        Self {
            success: true,
            status: AcceptStatus::Accepted,
            task_id: Some(task_id.to_string()),
            current_task: None,
            error: None,
        }
    }

    pub fn busy(current: &str) -> Self {
        Self {
            success: false,
            status: AcceptStatus::Busy,
            task_id: None,
            current_task: Some(current.to_string()),
            error: Some(format!("worker busy with task {current}")),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            status: AcceptStatus::Rejected,
            task_id: None,
            current_task: None,
            error: Some(reason.into()),
        }
    }
}

/// `GET /task/{id}/result` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Requested skills the worker does not have.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_skills: Vec<String>,
    #[serde(default)]
    pub iterations: u32,
}

/// `POST /task/{id}/cancel` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub status: TaskStatus,
}

/// `GET /health` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub worker_id: String,
    pub current_task: Option<String>,
}

/// Busy/idle as reported by `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerActivity {
    Idle,
    Busy,
}

/// `GET /status` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatusResponse {
    pub worker_id: String,
    pub status: WorkerActivity,
    pub current_task: Option<String>,
    pub total_tasks: u64,
    pub skills: Vec<String>,
}

/// Generic JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
