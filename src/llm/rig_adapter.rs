//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.
//!
//! rig owns the wire format; this module only maps conversations, tool
//! schemas and errors between the two type systems.

use std::time::Duration;

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{
    AssistantContent, CompletionError, CompletionModel, Message,
    ToolDefinition as RigToolDefinition,
};
use rig::message::{ToolResultContent, UserContent};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
    ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// A rig completion model exposed as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
    timeout: Duration,
}

/// What one model turn produced.
struct Turn {
    text: Option<String>,
    tool_calls: Vec<ToolCall>,
    input_tokens: u32,
    output_tokens: u32,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "openai".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<Turn, LlmError> {
        let (preamble, history, prompt) = split_conversation(messages);

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .tools(tools.iter().map(to_rig_tool).collect());
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(t) = temperature {
            builder = builder.temperature(f64::from(t));
        }
        if let Some(n) = max_tokens {
            builder = builder.max_tokens(u64::from(n));
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| LlmError::RequestFailed {
                provider: self.provider.clone(),
                reason: format!("no response within {:?}", self.timeout),
            })?
            .map_err(|e| map_error(&self.provider, e))?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for item in response.choice.iter() {
            match item {
                AssistantContent::Text(text) => texts.push(text.text.clone()),
                AssistantContent::ToolCall(call) => tool_calls.push(ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                }),
                _ => {}
            }
        }

        Ok(Turn {
            text: (!texts.is_empty()).then(|| texts.join("")),
            tool_calls,
            input_tokens: saturate(response.usage.input_tokens),
            output_tokens: saturate(response.usage.output_tokens),
        })
    }
}

fn saturate(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn to_rig_tool(tool: &ToolDefinition) -> RigToolDefinition {
    RigToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

fn to_rig_message(message: &ChatMessage) -> Option<Message> {
    match message.role {
        Role::System => None,
        Role::User => Some(Message::user(message.content.clone())),
        Role::Assistant if message.tool_calls.is_empty() => {
            Some(Message::assistant(message.content.clone()))
        }
        Role::Assistant => {
            let text = (!message.content.is_empty())
                .then(|| AssistantContent::text(message.content.clone()));
            let calls = message.tool_calls.iter().map(|tc| {
                AssistantContent::tool_call(tc.id.clone(), tc.name.clone(), tc.arguments.clone())
            });
            let content = OneOrMany::many(text.into_iter().chain(calls)).ok()?;
            Some(Message::Assistant { id: None, content })
        }
        Role::Tool => {
            let id = message.tool_call_id.clone().unwrap_or_default();
            Some(Message::User {
                content: OneOrMany::one(UserContent::tool_result(
                    id,
                    OneOrMany::one(ToolResultContent::text(message.content.clone())),
                )),
            })
        }
    }
}

/// System turns become the preamble; the last remaining turn is the prompt
/// and everything before it is history.
fn split_conversation(messages: &[ChatMessage]) -> (Option<String>, Vec<Message>, Message) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut history: Vec<Message> = messages.iter().filter_map(to_rig_message).collect();
    let prompt = history.pop().unwrap_or_else(|| Message::user(""));
    (preamble, history, prompt)
}

fn map_error(provider: &str, err: CompletionError) -> LlmError {
    match err {
        CompletionError::ProviderError(body) => {
            let lower = body.to_lowercase();
            if lower.contains("rate limit") || lower.contains("429") {
                LlmError::RateLimited {
                    provider: provider.to_string(),
                    retry_after: None,
                }
            } else if lower.contains("401")
                || lower.contains("invalid_api_key")
                || lower.contains("unauthorized")
            {
                LlmError::AuthFailed {
                    provider: provider.to_string(),
                }
            } else {
                LlmError::RequestFailed {
                    provider: provider.to_string(),
                    reason: body,
                }
            }
        }
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: e.to_string(),
        },
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let turn = self
            .turn(
                &request.messages,
                &[],
                request.temperature,
                request.max_tokens,
            )
            .await?;
        Ok(CompletionResponse {
            content: turn.text.unwrap_or_default(),
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let turn = self
            .turn(
                &request.messages,
                &request.tools,
                request.temperature,
                request.max_tokens,
            )
            .await?;
        let finish_reason = if turn.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        Ok(ToolCompletionResponse {
            content: turn.text,
            tool_calls: turn.tool_calls,
            input_tokens: turn.input_tokens,
            output_tokens: turn.output_tokens,
            finish_reason,
            response_id: None,
        })
    }
}
