//! Append-only event stream emitted by an Agent Core run.
//!
//! Events are a reporting side channel: the log is kept for later retrieval
//! (the worker serves it at `/task/{id}/events`). Nothing in the run reads
//! them back.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent Core state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingLlm,
    ExecutingTool,
    Done,
    Failed,
    Aborted,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingLlm => "awaiting_llm",
            Self::ExecutingTool => "executing_tool",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged {
        task_id: String,
        from: AgentState,
        to: AgentState,
        iteration: u32,
    },
    /// The model answered; `tool_calls` counts requested calls.
    LlmResponse {
        task_id: String,
        iteration: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        tool_calls: usize,
    },
    ToolCallStarted {
        task_id: String,
        iteration: u32,
        call_id: String,
        tool: String,
    },
    ToolCallFinished {
        task_id: String,
        iteration: u32,
        call_id: String,
        tool: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
        /// First 200 chars of the output or error.
        summary: String,
    },
    Finished {
        task_id: String,
        state: AgentState,
        iterations: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// An event plus when it was recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

/// Retained, append-only log of one run's events. Clones share the log.
#[derive(Clone)]
pub struct EventStream {
    log: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Ok(mut log) = self.log.lock() {
            log.push(RecordedEvent {
                at: Utc::now(),
                event,
            });
        }
    }

    /// Copy of everything emitted so far, in order.
    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.log.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate a summary to 200 chars.
pub(crate) fn summarize(s: &str) -> String {
    if s.chars().count() <= 200 {
        s.to_string()
    } else {
        format!("{}…", s.chars().take(200).collect::<String>())
    }
}
