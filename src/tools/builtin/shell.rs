//! `shell_exec`: run a command inside the task's scratch directory.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::context::ToolContext;
use crate::tools::tool::{HandlerError, Tool, ToolOutput, require_str};

/// Maximum output size before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Default command timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound a caller may request through the `timeout` argument.
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Commands that are always blocked.
static BLOCKED_COMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "rm -rf /",
        "rm -rf /*",
        ":(){ :|:& };:",
        "dd if=/dev/zero",
        "mkfs",
        "chmod -R 777 /",
        "> /dev/sda",
        "curl | sh",
        "wget | sh",
        "curl | bash",
        "wget | bash",
    ])
});

static DANGEROUS_PATTERNS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "sudo ",
        "doas ",
        " | sh",
        " | bash",
        " | zsh",
        "$(curl",
        "$(wget",
        "/etc/shadow",
        "~/.ssh",
        "id_rsa",
        "shutdown",
        "reboot",
    ]
});

/// Shell command execution tool.
#[derive(Debug)]
pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_blocked(cmd: &str) -> Option<&'static str> {
        let normalized = cmd.to_lowercase();
        if BLOCKED_COMMANDS.iter().any(|b| normalized.contains(b)) {
            return Some("Command contains blocked pattern");
        }
        if DANGEROUS_PATTERNS.iter().any(|p| normalized.contains(p)) {
            return Some("Command contains potentially dangerous pattern");
        }
        None
    }

    async fn run(
        &self,
        cmd: &str,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<(String, i32), HandlerError> {
        let mut command = Command::new("sh");
        command
            .args(["-c", cmd])
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| HandlerError::ExecutionFailed(format!("Failed to spawn command: {e}")))?;

        let result = tokio::time::timeout(timeout, async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut out = child.stdout.take();
            let mut err = child.stderr.take();
            let read_out = async {
                if let Some(ref mut o) = out {
                    o.read_to_end(&mut stdout).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let read_err = async {
                if let Some(ref mut e) = err {
                    e.read_to_end(&mut stderr).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let (r1, r2) = tokio::join!(read_out, read_err);
            r1?;
            r2?;
            let status = child.wait().await?;

            let stdout = String::from_utf8_lossy(&stdout).to_string();
            let stderr = String::from_utf8_lossy(&stderr).to_string();
            let output = if stderr.is_empty() {
                stdout
            } else if stdout.is_empty() {
                stderr
            } else {
                format!("{stdout}\n\n--- stderr ---\n{stderr}")
            };
            Ok::<_, std::io::Error>((output, status.code().unwrap_or(-1)))
        })
        .await;

        match result {
            Ok(Ok((output, code))) => Ok((truncate_output(&output), code)),
            Ok(Err(e)) => Err(HandlerError::ExecutionFailed(format!(
                "Command execution failed: {e}"
            ))),
            Err(_) => Err(HandlerError::Timeout(timeout)),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell_exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the task workspace and return its output and exit code."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (optional, default 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, HandlerError> {
        let command = require_str(&params, "command")?;
        if let Some(reason) = Self::is_blocked(command) {
            return Err(HandlerError::NotAuthorized(format!(
                "{reason}: {}",
                truncate_for_error(command)
            )));
        }

        let timeout = params
            .get("timeout")
            .and_then(|v| v.as_f64())
            .filter(|s| *s > 0.0)
            .map(|s| Duration::from_secs_f64(s).min(MAX_TIMEOUT))
            .unwrap_or(self.timeout);

        let start = std::time::Instant::now();
        let (output, exit_code) = self.run(command, ctx.workdir(), timeout).await?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "output": output,
                "exit_code": exit_code,
                "success": exit_code == 0,
            }),
            start.elapsed(),
        ))
    }

    fn execution_timeout(&self) -> Duration {
        // Registry budget sits above the per-command budget so the command's
        // own timeout is the one that fires.
        MAX_TIMEOUT + Duration::from_secs(5)
    }
}

/// Truncate output to fit within limits (UTF-8 safe).
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let half = MAX_OUTPUT_SIZE / 2;
    let head_end = floor_char_boundary(s, half);
    let tail_start = floor_char_boundary(s, s.len() - half);
    format!(
        "{}\n\n... [truncated {} bytes] ...\n\n{}",
        &s[..head_end],
        s.len() - MAX_OUTPUT_SIZE,
        &s[tail_start..]
    )
}

/// Largest byte index <= `i` that is a char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn truncate_for_error(s: &str) -> String {
    if s.chars().count() <= 100 {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(100).collect::<String>())
    }
}
