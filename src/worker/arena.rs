//! Task-scoped arena: everything a single task may touch.
//!
//! Built fresh per task from the requested skills. `release()` deletes the
//! scratch directory and drops the tool instances; if the arena is dropped
//! without being released (a panicking run), `Drop` removes the directory
//! synchronously.

use std::path::Path;
use std::sync::Arc;

use crate::error::WorkspaceError;
use crate::tools::{SkillCatalog, ToolRegistry};
use crate::workspace::{TaskWorkspace, WorkspaceRoot};

pub struct TaskArena {
    task_id: String,
    workspace: Option<TaskWorkspace>,
    registry: Arc<ToolRegistry>,
    unknown_skills: Vec<String>,
}

impl TaskArena {
    pub async fn build(
        task_id: &str,
        skills: &[String],
        catalog: &SkillCatalog,
        root: &WorkspaceRoot,
    ) -> Result<Self, WorkspaceError> {
        let workspace = root.create(task_id).await?;
        let set = catalog.instantiate(skills);
        let tools = set.registry.count().await;
        tracing::debug!(
            task_id,
            tools,
            workdir = %workspace.path().display(),
            "Task arena ready"
        );
        Ok(Self {
            task_id: task_id.to_string(),
            workspace: Some(workspace),
            registry: Arc::new(set.registry),
            unknown_skills: set.unknown,
        })
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn workdir(&self) -> &Path {
        self.workspace
            .as_ref()
            .map(TaskWorkspace::path)
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn unknown_skills(&self) -> &[String] {
        &self.unknown_skills
    }

    /// Tear down tools and delete the scratch directory.
    pub async fn release(mut self) {
        self.registry.clear().await;
        if let Some(ws) = self.workspace.take()
            && let Err(e) = ws.remove().await
        {
            tracing::warn!(task_id = %self.task_id, error = %e, "Failed to remove task workspace");
        }
        tracing::debug!(task_id = %self.task_id, "Task arena released");
    }
}

impl Drop for TaskArena {
    fn drop(&mut self) {
        if let Some(ws) = self.workspace.take() {
            let _ = std::fs::remove_dir_all(ws.path());
        }
    }
}
