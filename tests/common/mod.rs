//! Shared helpers for the integration tests: stub LLMs and in-process servers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;

use taskhive::config::{AgentConfig, WorkerConfig};
use taskhive::error::LlmError;
use taskhive::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use taskhive::protocol::TaskResultResponse;
use taskhive::tools::SkillCatalog;
use taskhive::worker::{TaskExecutor, worker_routes};

/// Maximum time any test waits for a terminal status.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What the stub model says next.
pub enum Reply {
    Text(String),
    Call(&'static str, serde_json::Value),
}

type Behaviour = Box<dyn Fn(&[ChatMessage]) -> Reply + Send + Sync>;

/// Stub LLM provider (no real API calls). Each turn is decided from the
/// conversation so far.
pub struct StubLlm {
    behaviour: Behaviour,
    delay: Duration,
    calls: AtomicU32,
}

impl StubLlm {
    pub fn new(f: impl Fn(&[ChatMessage]) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            behaviour: Box::new(f),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn text(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Reply::Text(reply.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn turn(&self, messages: &[ChatMessage]) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.behaviour)(messages)
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let content = match self.turn(&request.messages).await {
            Reply::Text(t) => t,
            Reply::Call(name, _) => format!("(wanted to call {name} but had no tools)"),
        };
        Ok(CompletionResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (content, tool_calls) = match self.turn(&request.messages).await {
            Reply::Text(t) => (Some(t), Vec::new()),
            Reply::Call(name, arguments) => (
                None,
                vec![ToolCall {
                    id: format!("call_{}", request.messages.len()),
                    name: name.to_string(),
                    arguments,
                }],
            ),
        };
        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason,
            response_id: None,
        })
    }
}

/// Bind `127.0.0.1:0`, serve `app`, return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A running worker node. Dropping it removes its scratch root.
pub struct TestWorker {
    pub id: String,
    pub url: String,
    pub executor: TaskExecutor,
    pub scratch: TempDir,
}

pub async fn spawn_worker(id: &str, llm: StubLlm) -> TestWorker {
    let scratch = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        worker_id: id.to_string(),
        workspace_root: scratch.path().to_path_buf(),
        agent: AgentConfig {
            max_iterations: 20,
            ..AgentConfig::default()
        },
        ..WorkerConfig::default()
    };
    let executor = TaskExecutor::new(config, Arc::new(llm), SkillCatalog::builtin());
    let url = serve(worker_routes(executor.clone())).await;
    TestWorker {
        id: id.to_string(),
        url,
        executor,
        scratch,
    }
}

/// Poll `GET /task/{id}/result` until terminal.
pub async fn wait_terminal(
    http: &reqwest::Client,
    url: &str,
    task_id: &str,
) -> TaskResultResponse {
    let poll = async {
        loop {
            let resp = http
                .get(format!("{url}/task/{task_id}/result"))
                .send()
                .await
                .unwrap();
            if resp.status().is_success() {
                let body: TaskResultResponse = resp.json().await.unwrap();
                if body.status.is_terminal() {
                    return body;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(TEST_TIMEOUT, poll)
        .await
        .expect("task did not reach a terminal status")
}

/// The text of every user turn, joined.
pub fn user_turns(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role == taskhive::llm::Role::User)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Content of the most recent tool result, if the last turn was one.
pub fn last_tool_result(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .last()
        .filter(|m| m.role == taskhive::llm::Role::Tool)
        .map(|m| m.content.as_str())
}
