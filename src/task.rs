//! Task record and its monotonic status machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// Transitions only move forward: pending → dispatched → running → terminal.
/// Intermediate steps may be skipped (a worker goes straight from pending to
/// running) but never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Dispatched => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled => 3,
        }
    }

    /// Check if this status allows moving to `target`.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        target.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A recorded status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A unit of work, as tracked by whichever side owns it.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub objective: String,
    pub context: Option<String>,
    pub skills_required: Vec<String>,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub status: TaskStatus,
    result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub transitions: Vec<StatusTransition>,
}

impl Task {
    pub fn new(id: impl Into<String>, objective: impl Into<String>, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
            context: None,
            skills_required: Vec::new(),
            ttl,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            transitions: Vec::new(),
        }
    }

    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.skills_required = skills;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Move to `target`, recording the transition and timestamps.
    pub fn transition_to(
        &mut self,
        target: TaskStatus,
        reason: Option<String>,
    ) -> Result<(), crate::error::TaskError> {
        if !self.status.can_transition_to(target) {
            return Err(crate::error::TaskError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }

        self.transitions.push(StatusTransition {
            from: self.status,
            to: target,
            timestamp: Utc::now(),
            reason,
        });
        self.status = target;

        match target {
            TaskStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(())
    }

    /// Terminal transition carrying the outcome.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), crate::error::TaskError> {
        if !status.is_terminal() {
            return Err(crate::error::TaskError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: status.to_string(),
            });
        }
        self.transition_to(status, error.clone())?;
        self.result = result;
        self.error = error;
        Ok(())
    }

    /// The result, readable only once the task is terminal.
    pub fn result(&self) -> Option<&str> {
        if self.status.is_terminal() {
            self.result.as_deref()
        } else {
            None
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
