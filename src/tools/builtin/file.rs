//! File tools confined to the task's scratch directory.
//!
//! Relative paths resolve against `ToolContext::workdir`; anything that
//! escapes it (absolute paths outside, `..` traversal, symlinked parents) is
//! refused.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::context::ToolContext;
use crate::tools::tool::{HandlerError, Tool, ToolOutput, require_str};

/// Maximum file size for reading (1MB).
const MAX_READ_SIZE: u64 = 1024 * 1024;

/// Maximum file size for writing (5MB).
const MAX_WRITE_SIZE: usize = 5 * 1024 * 1024;

/// Resolve `.` and `..` lexically, without touching the filesystem.
///
/// `canonicalize` only works on paths that exist, so new files need this.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Canonicalize the nearest existing ancestor and re-append the missing tail.
fn canonical_with_missing_tail(resolved: &Path) -> PathBuf {
    let mut ancestor = resolved;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if ancestor.exists() {
            let mut result = ancestor
                .canonicalize()
                .unwrap_or_else(|_| ancestor.to_path_buf());
            for part in tail.into_iter().rev() {
                result = result.join(part);
            }
            return result;
        }
        if let Some(name) = ancestor.file_name() {
            tail.push(name);
        }
        match ancestor.parent() {
            Some(parent) if parent != ancestor => ancestor = parent,
            _ => return resolved.to_path_buf(),
        }
    }
}

/// Resolve `path_str` inside `base`, refusing anything that escapes it.
fn resolve_in_sandbox(path_str: &str, base: &Path) -> Result<PathBuf, HandlerError> {
    let path = PathBuf::from(path_str);
    let joined = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };
    let resolved = normalize_lexical(&joined);

    let base_canonical = base
        .canonicalize()
        .unwrap_or_else(|_| normalize_lexical(base));
    let check_path = canonical_with_missing_tail(&resolved);

    if !check_path.starts_with(&base_canonical) {
        return Err(HandlerError::NotAuthorized(format!(
            "Path escapes task workspace: {path_str}"
        )));
    }
    Ok(resolved)
}

// ── file_read ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file from the task workspace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the task workspace"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, HandlerError> {
        let path_str = require_str(&params, "path")?;
        let start = std::time::Instant::now();
        let path = resolve_in_sandbox(path_str, ctx.workdir())?;

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| HandlerError::ExecutionFailed(format!("Cannot access file: {e}")))?;
        if metadata.len() > MAX_READ_SIZE {
            return Err(HandlerError::ExecutionFailed(format!(
                "File too large ({} bytes). Maximum is {MAX_READ_SIZE} bytes.",
                metadata.len()
            )));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| HandlerError::ExecutionFailed(format!("Failed to read file: {e}")))?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "path": path_str,
                "content": content,
                "size": metadata.len(),
            }),
            start.elapsed(),
        ))
    }
}

// ── file_write ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the task workspace. Creates parent directories \
         and overwrites an existing file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the task workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, HandlerError> {
        let path_str = require_str(&params, "path")?;
        let content = require_str(&params, "content")?;
        let start = std::time::Instant::now();

        if content.len() > MAX_WRITE_SIZE {
            return Err(HandlerError::InvalidParameters(format!(
                "Content too large ({} bytes). Maximum is {MAX_WRITE_SIZE} bytes.",
                content.len()
            )));
        }

        let path = resolve_in_sandbox(path_str, ctx.workdir())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                HandlerError::ExecutionFailed(format!("Failed to create directories: {e}"))
            })?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| HandlerError::ExecutionFailed(format!("Failed to write file: {e}")))?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "path": path_str,
                "bytes_written": content.len(),
            }),
            start.elapsed(),
        ))
    }
}
