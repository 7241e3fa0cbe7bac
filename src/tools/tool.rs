//! The `Tool` trait and handler-level result types.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::context::ToolContext;

/// Default wall-clock budget for one handler invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure reported by a tool handler.
///
/// The registry folds these into [`crate::error::ToolError`], tagging them with
/// the tool name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Output of a successful tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    #[serde(skip)]
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }

    /// Render for the conversation: strings verbatim, everything else as JSON.
    pub fn to_content(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A named capability with a declared argument schema and a handler.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema (object form) describing the arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, HandlerError>;

    fn execution_timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

/// Fetch a required string parameter.
pub fn require_str<'a>(params: &'a serde_json::Value, name: &str) -> Result<&'a str, HandlerError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerError::InvalidParameters(format!("missing '{name}' parameter")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_str_reports_missing_field() {
        let params = serde_json::json!({"path": "a.txt", "n": 3});
        assert_eq!(require_str(&params, "path").unwrap(), "a.txt");
        assert!(matches!(
            require_str(&params, "n"),
            Err(HandlerError::InvalidParameters(_))
        ));
        assert!(require_str(&params, "missing").is_err());
    }

    #[test]
    fn text_output_renders_verbatim() {
        let out = ToolOutput::text("hello", Duration::ZERO);
        assert_eq!(out.to_content(), "hello");
        let out = ToolOutput::success(serde_json::json!({"a": 1}), Duration::ZERO);
        assert_eq!(out.to_content(), "{\"a\":1}");
    }
}
