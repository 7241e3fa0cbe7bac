//! Tool registry: name → tool, with validation at the call boundary.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio::sync::RwLock;

use crate::context::ToolContext;
use crate::error::ToolError;
use crate::llm::ToolDefinition;
use crate::tools::schema;
use crate::tools::tool::{HandlerError, Tool, ToolOutput};

/// Registry of available tools.
///
/// Not a singleton: every Agent Core gets its own instance, so tool state
/// never crosses task boundaries.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. A later registration under the same name replaces the
    /// earlier one.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().await.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replaced tool");
        } else {
            tracing::debug!(tool = %name, "Registered tool");
        }
    }

    /// Register a tool while the registry is still being assembled.
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Ok(mut tools) = self.tools.try_write() {
            tools.insert(name.clone(), tool);
            tracing::debug!(tool = %name, "Registered tool");
        } else {
            tracing::warn!(tool = %name, "Registry locked, tool not registered");
        }
    }

    /// Unregister a tool.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().await.remove(name)
    }

    /// Drop every registered tool.
    pub async fn clear(&self) {
        self.tools.write().await.clear();
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Check if a tool exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// List all tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Get tool definitions for LLM function calling, sorted by name.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.read().await.values().map(|t| definition(t.as_ref())).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get tool definitions for specific tools.
    pub async fn tool_definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        names
            .iter()
            .filter_map(|name| tools.get(*name))
            .map(|tool| definition(tool.as_ref()))
            .collect()
    }

    /// Look up, validate, and invoke a tool.
    ///
    /// Never panics: a panicking handler comes back as
    /// `ToolError::ExecutionFailed`, an overrunning one as `ToolError::Timeout`.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).await.ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        schema::validate(&tool.parameters_schema(), &args).map_err(|reason| {
            ToolError::InvalidParameters {
                name: name.to_string(),
                reason,
            }
        })?;

        let timeout = tool.execution_timeout();
        let start = Instant::now();
        let invocation = AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind();

        let outcome = match tokio::time::timeout(timeout, invocation).await {
            Err(_) => Err(ToolError::Timeout {
                name: name.to_string(),
                timeout,
            }),
            Ok(Err(panic)) => Err(ToolError::ExecutionFailed {
                name: name.to_string(),
                reason: format!("handler panicked: {}", panic_message(panic.as_ref())),
            }),
            Ok(Ok(result)) => result.map_err(|e| from_handler(name, e)),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::debug!(tool = %name, task_id = %ctx.task_id, elapsed_ms, "Tool succeeded"),
            Err(e) => tracing::debug!(tool = %name, task_id = %ctx.task_id, elapsed_ms, error = %e, "Tool failed"),
        }
        outcome
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn definition(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

fn from_handler(name: &str, err: HandlerError) -> ToolError {
    let name = name.to_string();
    match err {
        HandlerError::InvalidParameters(reason) => ToolError::InvalidParameters { name, reason },
        HandlerError::Timeout(timeout) => ToolError::Timeout { name, timeout },
        HandlerError::ExecutionFailed(reason) | HandlerError::NotAuthorized(reason) => {
            ToolError::ExecutionFailed { name, reason }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
