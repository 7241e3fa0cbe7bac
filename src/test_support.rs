//! Scripted LLM for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Calls(Vec<(String, serde_json::Value)>),
    Error,
}

impl Step {
    pub fn call(name: &str, args: serde_json::Value) -> Self {
        Self::Calls(vec![(name.to_string(), args)])
    }
}

pub fn text_step(s: &str) -> Step {
    Step::Text(s.to_string())
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Step + Send + Sync>;

pub struct ScriptedLlm {
    steps: Mutex<VecDeque<Step>>,
    repeat: Option<Step>,
    responder: Option<Responder>,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat: None,
            responder: None,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn repeating(step: Step) -> Self {
        Self {
            repeat: Some(step),
            ..Self::new(Vec::new())
        }
    }

    /// Decide each turn from the conversation so far.
    pub fn from_fn(f: impl Fn(&[ChatMessage]) -> Step + Send + Sync + 'static) -> Self {
        Self {
            responder: Some(Box::new(f)),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, messages: &[ChatMessage]) -> Step {
        if let Some(ref f) = self.responder {
            return f(messages);
        }
        let scripted = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        scripted
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| Step::Text("(script exhausted)".to_string()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_step(&request.messages) {
            Step::Error => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: format!("scripted failure #{n}"),
            }),
            Step::Text(content) => Ok(CompletionResponse {
                content,
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            }),
            Step::Calls(_) => Ok(CompletionResponse {
                content: String::new(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            }),
        }
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_step(&request.messages) {
            Step::Error => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: format!("scripted failure #{n}"),
            }),
            Step::Text(content) => Ok(ToolCompletionResponse {
                content: Some(content),
                tool_calls: Vec::new(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            }),
            Step::Calls(calls) => Ok(ToolCompletionResponse {
                content: None,
                tool_calls: calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, arguments))| ToolCall {
                        id: format!("call_{n}_{i}"),
                        name,
                        arguments,
                    })
                    .collect(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::ToolUse,
                response_id: None,
            }),
        }
    }
}
