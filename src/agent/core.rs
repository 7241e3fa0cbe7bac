//! Agent Core: the bounded LLM tool-calling loop.
//!
//! One iteration sends the conversation and tool schemas to the model, then
//! either finishes (a turn without tool calls is the completion signal) or
//! executes every requested call and appends the results. Tool failures of
//! any kind go back to the model as structured errors; they never end the
//! run. The abort flag is only looked at between iterations, so an in-flight
//! tool call always runs to completion.

use std::sync::Arc;

use crate::agent::context::AgentContext;
use crate::agent::events::{AgentEvent, AgentState, EventStream, summarize};
use crate::config::AgentConfig;
use crate::error::{TaskError, ToolError};
use crate::llm::{
    ChatMessage, LlmProvider, Reasoning, ReasoningContext, RespondResult, TokenUsage, ToolCall,
};
use crate::tools::ToolRegistry;

/// How a run ended.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub state: AgentState,
    /// Final answer, set when `state` is `Done`.
    pub result: Option<String>,
    pub error: Option<String>,
    pub iterations: u32,
    pub usage: TokenUsage,
}

impl AgentOutcome {
    pub fn is_done(&self) -> bool {
        self.state == AgentState::Done
    }
}

/// Render a tool failure as the JSON the model sees.
pub fn tool_error_payload(err: &ToolError) -> String {
    serde_json::json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
        }
    })
    .to_string()
}

/// The loop itself. Holds no per-task state; that lives in `AgentContext`.
pub struct AgentCore {
    reasoning: Reasoning,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    events: EventStream,
}

impl AgentCore {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            reasoning: Reasoning::new(llm),
            tools,
            config,
            events: EventStream::new(),
        }
    }

    /// Emit into an existing stream instead of a private one.
    pub fn with_events(mut self, events: EventStream) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    fn set_state(&self, ctx: &AgentContext, state: &mut AgentState, to: AgentState) {
        if *state == to {
            return;
        }
        self.events.emit(AgentEvent::StateChanged {
            task_id: ctx.task_id().to_string(),
            from: *state,
            to,
            iteration: ctx.iteration(),
        });
        *state = to;
    }

    fn finish(
        &self,
        ctx: &AgentContext,
        state: &mut AgentState,
        to: AgentState,
        result: Option<String>,
        error: Option<String>,
        usage: TokenUsage,
    ) -> AgentOutcome {
        self.set_state(ctx, state, to);
        self.events.emit(AgentEvent::Finished {
            task_id: ctx.task_id().to_string(),
            state: to,
            iterations: ctx.iteration(),
            error: error.clone(),
        });
        tracing::debug!(
            task_id = %ctx.task_id(),
            state = %to,
            iterations = ctx.iteration(),
            "Agent run finished"
        );
        AgentOutcome {
            state: to,
            result,
            error,
            iterations: ctx.iteration(),
            usage,
        }
    }

    /// Run until done, failed, or aborted.
    pub async fn run(&self, ctx: &mut AgentContext) -> AgentOutcome {
        let mut state = AgentState::Idle;
        let mut usage = TokenUsage::default();
        let tool_ctx = ctx.tool_context();

        loop {
            if ctx.is_aborted() {
                return self.finish(
                    ctx,
                    &mut state,
                    AgentState::Aborted,
                    None,
                    Some("aborted".to_string()),
                    usage,
                );
            }

            if ctx.iteration() >= self.config.max_iterations {
                let err = TaskError::MaxIterations {
                    id: ctx.task_id().to_string(),
                    iterations: ctx.iteration(),
                };
                return self.finish(
                    ctx,
                    &mut state,
                    AgentState::Failed,
                    None,
                    Some(err.to_string()),
                    usage,
                );
            }

            let iteration = ctx.next_iteration();
            self.set_state(ctx, &mut state, AgentState::AwaitingLlm);

            let reasoning_ctx = ReasoningContext::new()
                .with_messages(ctx.messages().to_vec())
                .with_tools(self.tools.tool_definitions().await)
                .with_metadata(
                    [("task_id".to_string(), ctx.task_id().to_string())]
                        .into_iter()
                        .collect(),
                );

            let output = match self.reasoning.respond_with_tools(&reasoning_ctx).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(task_id = %ctx.task_id(), iteration, error = %e, "LLM call failed");
                    return self.finish(
                        ctx,
                        &mut state,
                        AgentState::Failed,
                        None,
                        Some(format!("LLM error: {e}")),
                        usage,
                    );
                }
            };
            usage.input_tokens += output.usage.input_tokens;
            usage.output_tokens += output.usage.output_tokens;

            match output.result {
                RespondResult::Text(text) => {
                    self.events.emit(AgentEvent::LlmResponse {
                        task_id: ctx.task_id().to_string(),
                        iteration,
                        content: Some(summarize(&text)),
                        tool_calls: 0,
                    });
                    ctx.push(ChatMessage::assistant(text.clone()));
                    return self.finish(ctx, &mut state, AgentState::Done, Some(text), None, usage);
                }
                RespondResult::ToolCalls {
                    tool_calls,
                    content,
                } => {
                    self.events.emit(AgentEvent::LlmResponse {
                        task_id: ctx.task_id().to_string(),
                        iteration,
                        content: content.as_deref().map(summarize),
                        tool_calls: tool_calls.len(),
                    });
                    ctx.push(ChatMessage::assistant_with_tool_calls(
                        content,
                        tool_calls.clone(),
                    ));
                    self.set_state(ctx, &mut state, AgentState::ExecutingTool);
                    for call in tool_calls {
                        let message = self.execute_call(ctx, iteration, &call, &tool_ctx).await;
                        ctx.push(message);
                    }
                }
            }

            if !self.config.iteration_delay.is_zero() {
                tokio::time::sleep(self.config.iteration_delay).await;
            }
        }
    }

    async fn execute_call(
        &self,
        ctx: &AgentContext,
        iteration: u32,
        call: &ToolCall,
        tool_ctx: &crate::context::ToolContext,
    ) -> ChatMessage {
        self.events.emit(AgentEvent::ToolCallStarted {
            task_id: ctx.task_id().to_string(),
            iteration,
            call_id: call.id.clone(),
            tool: call.name.clone(),
        });

        let (content, success, error_kind) = match self
            .tools
            .execute(&call.name, call.arguments.clone(), tool_ctx)
            .await
        {
            Ok(output) => (output.to_content(), true, None),
            Err(e) => {
                tracing::debug!(
                    task_id = %ctx.task_id(),
                    tool = %call.name,
                    kind = e.kind(),
                    error = %e,
                    "Tool call failed, returning error to model"
                );
                (tool_error_payload(&e), false, Some(e.kind().to_string()))
            }
        };

        self.events.emit(AgentEvent::ToolCallFinished {
            task_id: ctx.task_id().to_string(),
            iteration,
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success,
            error_kind,
            summary: summarize(&content),
        });

        ChatMessage::tool_result(call.id.clone(), call.name.clone(), content)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::Role;
    use crate::test_support::{ScriptedLlm, Step, text_step};
    use crate::tools::SkillCatalog;

    fn registry_with_files() -> Arc<ToolRegistry> {
        Arc::new(
            SkillCatalog::builtin()
                .instantiate(&["file_ops".to_string()])
                .registry,
        )
    }

    fn ctx(dir: &std::path::Path) -> AgentContext {
        AgentContext::for_objective("task-1", dir, "sys", "do the thing", None)
    }

    #[tokio::test]
    async fn text_reply_completes() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(vec![text_step("all done")]);
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), AgentConfig::default());
        let mut ctx = ctx(dir.path());

        let outcome = core.run(&mut ctx).await;
        assert_eq!(outcome.state, AgentState::Done);
        assert_eq!(outcome.result.as_deref(), Some("all done"));
        assert_eq!(outcome.iterations, 1);
        assert_eq!(ctx.messages().last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn missing_required_argument_is_fed_back_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(ScriptedLlm::new(vec![
            Step::call("file_write", serde_json::json!({"path": "a.txt"})),
            Step::call(
                "file_write",
                serde_json::json!({"path": "a.txt", "content": "hi"}),
            ),
            text_step("written"),
        ]));
        let core = AgentCore::new(llm.clone(), registry_with_files(), AgentConfig::default());
        let mut ctx = ctx(dir.path());

        let outcome = core.run(&mut ctx).await;
        assert_eq!(outcome.state, AgentState::Done);
        assert_eq!(outcome.iterations, 3);
        assert!(dir.path().join("a.txt").exists());

        let first_result = ctx
            .messages()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&first_result.content).unwrap();
        assert_eq!(payload["error"]["kind"], "validation_error");
        assert!(
            payload["error"]["message"]
                .as_str()
                .unwrap()
                .contains("content")
        );

        let events = core.events().snapshot();
        assert!(events.iter().any(|e| matches!(
            &e.event,
            AgentEvent::ToolCallFinished { success: false, error_kind: Some(k), .. } if k == "validation_error"
        )));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(vec![
            Step::call("teleport", serde_json::json!({})),
            text_step("fine"),
        ]);
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), AgentConfig::default());
        let outcome = core.run(&mut ctx(dir.path())).await;
        assert!(outcome.is_done());
    }

    #[tokio::test]
    async fn iteration_cap_fails() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::repeating(Step::call("file_read", serde_json::json!({"path": "x"})));
        let config = AgentConfig {
            max_iterations: 3,
            ..AgentConfig::default()
        };
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), config);
        let outcome = core.run(&mut ctx(dir.path())).await;
        assert_eq!(outcome.state, AgentState::Failed);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.error.unwrap().contains("iteration cap"));
    }

    #[tokio::test]
    async fn llm_error_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(vec![Step::Error]);
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), AgentConfig::default());
        let outcome = core.run(&mut ctx(dir.path())).await;
        assert_eq!(outcome.state, AgentState::Failed);
        assert!(outcome.error.unwrap().starts_with("LLM error"));
    }

    #[tokio::test]
    async fn abort_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(vec![text_step("never")]);
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), AgentConfig::default());
        let mut ctx = ctx(dir.path());
        ctx.abort();
        let outcome = core.run(&mut ctx).await;
        assert_eq!(outcome.state, AgentState::Aborted);
        assert_eq!(outcome.iterations, 0);
    }

    #[tokio::test]
    async fn abort_is_observed_at_iteration_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::repeating(Step::call("file_read", serde_json::json!({"path": "x"})))
            .with_delay(Duration::from_millis(20));
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), AgentConfig {
            max_iterations: 1000,
            ..AgentConfig::default()
        });
        let mut ctx = ctx(dir.path());
        let handle = ctx.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });
        let outcome = core.run(&mut ctx).await;
        assert_eq!(outcome.state, AgentState::Aborted);
        assert!(outcome.iterations >= 1);

        // Every started tool call also finished.
        let events = core.events().snapshot();
        let started = events
            .iter()
            .filter(|e| matches!(e.event, AgentEvent::ToolCallStarted { .. }))
            .count();
        let finished = events
            .iter()
            .filter(|e| matches!(e.event, AgentEvent::ToolCallFinished { .. }))
            .count();
        assert_eq!(started, finished);
    }

    #[tokio::test]
    async fn event_sequence_for_one_tool_round() {
        let dir = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(vec![
            Step::call(
                "file_write",
                serde_json::json!({"path": "a.txt", "content": "x"}),
            ),
            text_step("ok"),
        ]);
        let core = AgentCore::new(Arc::new(llm), registry_with_files(), AgentConfig::default());
        core.run(&mut ctx(dir.path())).await;

        let states: Vec<AgentState> = core
            .events()
            .snapshot()
            .into_iter()
            .filter_map(|e| match e.event {
                AgentEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                AgentState::AwaitingLlm,
                AgentState::ExecutingTool,
                AgentState::AwaitingLlm,
                AgentState::Done
            ]
        );
        assert!(matches!(
            core.events().snapshot().last().unwrap().event,
            AgentEvent::Finished { state: AgentState::Done, .. }
        ));
    }

    #[test]
    fn error_payload_shape() {
        let payload = tool_error_payload(&ToolError::NotFound { name: "x".into() });
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["error"]["kind"], "not_found");
    }
}
