//! Error types for taskhive.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} returned server error {status}: {body}")]
    ServerError {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::ServerError { .. }
        )
    }
}

/// Tool invocation errors surfaced by the registry.
///
/// `InvalidParameters` is the validation failure handed back to the model for
/// self-correction; `ExecutionFailed` and `Timeout` are handler failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

impl ToolError {
    /// Short machine-readable kind, used in the structured error fed to the LLM.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidParameters { .. } => "validation_error",
            Self::ExecutionFailed { .. } => "handler_error",
            Self::Timeout { .. } => "handler_timeout",
        }
    }
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: String },

    #[error("Task {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        state: String,
        target: String,
    },

    #[error("Worker busy with task {current}")]
    Busy { current: String },

    #[error("Invalid task: {0}")]
    Invalid(String),

    #[error("Task {id} hit the iteration cap ({iterations}) without completing")]
    MaxIterations { id: String, iterations: u32 },

    #[error("Task {id} exceeded its TTL of {ttl:?}")]
    Timeout { id: String, ttl: Duration },
}

/// Errors on the master → worker path.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Worker {worker_id} unreachable: {reason}")]
    Network { worker_id: String, reason: String },

    #[error("Worker {worker_id} is busy")]
    Busy { worker_id: String },

    #[error("Worker {worker_id} answered with unexpected status {status}: {body}")]
    UnexpectedStatus {
        worker_id: String,
        status: u16,
        body: String,
    },

    #[error("Unknown worker {worker_id}")]
    UnknownWorker { worker_id: String },

    #[error("Task {task_id} is not known to worker {worker_id}")]
    UnknownTask { task_id: String, worker_id: String },

    #[error("Task id '{task_id}' cannot be addressed on a worker")]
    InvalidTaskId { task_id: String },

    #[error("No idle worker available")]
    NoWorkersAvailable,

    #[error("Dispatch exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Task {task_id} timed out after {ttl:?}")]
    Timeout { task_id: String, ttl: Duration },
}

impl DispatchError {
    /// Whether the failure says something about the worker's reachability.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Planner errors. All of them are absorbed by a local-handling fallback.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Scratch workspace errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Path escapes workspace: {0}")]
    PathEscape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
