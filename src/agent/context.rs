//! Per-run conversation state.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::context::ToolContext;
use crate::llm::ChatMessage;

/// Conversation history, iteration counter, and abort flag for one run.
///
/// Scoped to exactly one task. Nothing in here is shared with any other
/// context; the abort token is handed out only to the run's owner.
#[derive(Debug)]
pub struct AgentContext {
    task_id: String,
    messages: Vec<ChatMessage>,
    iteration: u32,
    abort: CancellationToken,
    workdir: PathBuf,
}

impl AgentContext {
    pub fn new(task_id: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            task_id: task_id.into(),
            messages: Vec::new(),
            iteration: 0,
            abort: CancellationToken::new(),
            workdir: workdir.into(),
        }
    }

    /// Seed a context with the system prompt, optional background, and the
    /// objective as the first user turn.
    pub fn for_objective(
        task_id: impl Into<String>,
        workdir: impl Into<PathBuf>,
        system_prompt: &str,
        objective: &str,
        background: Option<&str>,
    ) -> Self {
        let mut ctx = Self::new(task_id, workdir);
        if !system_prompt.is_empty() {
            ctx.push(ChatMessage::system(system_prompt));
        }
        let user = match background.map(str::trim).filter(|b| !b.is_empty()) {
            Some(bg) => format!("{objective}\n\nContext:\n{bg}"),
            None => objective.to_string(),
        };
        ctx.push(ChatMessage::user(user));
        ctx
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub(crate) fn next_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    /// Handle that can request a cooperative abort from another task.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Use an externally created token as the abort flag.
    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = token;
        self
    }

    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.task_id.clone(), self.workdir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn seeded_context_layout() {
        let ctx = AgentContext::for_objective("t", "/tmp", "sys", "do x", Some("prior: 1"));
        let msgs = ctx.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[1].role, Role::User);
        assert!(msgs[1].content.contains("do x"));
        assert!(msgs[1].content.contains("prior: 1"));
        assert_eq!(ctx.iteration(), 0);
    }

    #[test]
    fn abort_handle_trips_the_context() {
        let ctx = AgentContext::new("t", "/tmp");
        let handle = ctx.abort_handle();
        assert!(!ctx.is_aborted());
        handle.cancel();
        assert!(ctx.is_aborted());
    }

    #[test]
    fn contexts_do_not_share_abort_flags() {
        let a = AgentContext::new("a", "/tmp");
        let b = AgentContext::new("b", "/tmp");
        a.abort();
        assert!(!b.is_aborted());
    }
}
