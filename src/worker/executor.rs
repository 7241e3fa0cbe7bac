//! Worker Task Executor.
//!
//! Accepts at most one task at a time. The busy check and the slot claim
//! happen under a single lock, so two racing `accept` calls can never both
//! win. An accepted task runs in the background on a fresh arena and a fresh
//! `AgentContext`; the arena is released before the terminal status becomes
//! visible, and the slot is freed in the same critical section that stores
//! the result.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentContext, AgentCore, AgentState, EventStream, RecordedEvent};
use crate::config::WorkerConfig;
use crate::error::TaskError;
use crate::llm::LlmProvider;
use crate::protocol::{
    CancelResponse, TaskRequest, TaskResultResponse, WorkerActivity, WorkerStatusResponse,
    is_valid_task_id,
};
use crate::task::{Task, TaskStatus};
use crate::tools::SkillCatalog;
use crate::worker::arena::TaskArena;
use crate::workspace::WorkspaceRoot;

/// Result of a successful `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Started running.
    Accepted,
    /// The task id is already known; nothing new was started.
    AlreadyKnown,
}

struct TaskRecord {
    task: Task,
    unknown_skills: Vec<String>,
    iterations: u32,
    events: EventStream,
    finished_at: Option<Instant>,
    first_retrieved: Option<Instant>,
}

impl TaskRecord {
    fn to_response(&self) -> TaskResultResponse {
        TaskResultResponse {
            task_id: self.task.id.clone(),
            status: self.task.status,
            result: self.task.result().map(str::to_string),
            error: self.task.error.clone(),
            started_at: self.task.started_at,
            completed_at: self.task.completed_at,
            unknown_skills: self.unknown_skills.clone(),
            iterations: self.iterations,
        }
    }

    fn expired(&self, now: Instant, retention: Duration, grace: Duration) -> bool {
        let Some(finished) = self.finished_at else {
            return false;
        };
        let grace_over = self
            .first_retrieved
            .is_some_and(|t| now.duration_since(t) >= grace);
        grace_over || now.duration_since(finished) >= retention
    }
}

struct ActiveTask {
    task_id: String,
    abort: CancellationToken,
}

struct Inner {
    config: WorkerConfig,
    llm: Arc<dyn LlmProvider>,
    catalog: SkillCatalog,
    workspace_root: WorkspaceRoot,
    active: Mutex<Option<ActiveTask>>,
    records: RwLock<HashMap<String, TaskRecord>>,
    total_tasks: AtomicU64,
}

/// Cheap-to-clone handle to the executor.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

impl TaskExecutor {
    pub fn new(config: WorkerConfig, llm: Arc<dyn LlmProvider>, catalog: SkillCatalog) -> Self {
        let workspace_root = WorkspaceRoot::new(config.workspace_root.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                llm,
                catalog,
                workspace_root,
                active: Mutex::new(None),
                records: RwLock::new(HashMap::new()),
                total_tasks: AtomicU64::new(0),
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.config.worker_id
    }

    /// Accept a task or report busy.
    pub async fn accept(&self, req: TaskRequest) -> Result<AcceptOutcome, TaskError> {
        if !is_valid_task_id(&req.task_id) {
            return Err(TaskError::Invalid(format!(
                "task_id '{}' must match [A-Za-z0-9_-]+",
                req.task_id
            )));
        }
        if req.description.trim().is_empty() {
            return Err(TaskError::Invalid("description must not be empty".to_string()));
        }

        let mut active = self.inner.active.lock().await;

        if self.inner.records.read().await.contains_key(&req.task_id) {
            tracing::debug!(task_id = %req.task_id, "Duplicate dispatch, already known");
            return Ok(AcceptOutcome::AlreadyKnown);
        }

        if let Some(ref current) = *active {
            tracing::info!(
                task_id = %req.task_id,
                current = %current.task_id,
                "Rejecting task, worker busy"
            );
            return Err(TaskError::Busy {
                current: current.task_id.clone(),
            });
        }

        let ttl = req
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.inner.config.default_ttl);
        let mut task = Task::new(req.task_id.clone(), req.description.clone(), ttl)
            .with_skills(req.skills.clone())
            .with_context(req.context.clone());
        task.transition_to(TaskStatus::Running, Some("accepted".to_string()))?;

        let events = EventStream::new();
        self.inner.records.write().await.insert(
            req.task_id.clone(),
            TaskRecord {
                task,
                unknown_skills: Vec::new(),
                iterations: 0,
                events: events.clone(),
                finished_at: None,
                first_retrieved: None,
            },
        );

        let abort = CancellationToken::new();
        *active = Some(ActiveTask {
            task_id: req.task_id.clone(),
            abort: abort.clone(),
        });
        drop(active);

        self.inner.total_tasks.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            task_id = %req.task_id,
            skills = ?req.skills,
            ttl_secs = ttl.as_secs(),
            "Task accepted"
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.run(req, ttl, abort, events).await;
        });

        Ok(AcceptOutcome::Accepted)
    }

    async fn run(&self, req: TaskRequest, ttl: Duration, abort: CancellationToken, events: EventStream) {
        let task_id = req.task_id.clone();
        let start = Instant::now();

        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let abort = abort.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                timed_out.store(true, Ordering::SeqCst);
                abort.cancel();
            })
        };

        let (status, result, error, iterations, unknown_skills) = match TaskArena::build(
            &task_id,
            &req.skills,
            &self.inner.catalog,
            &self.inner.workspace_root,
        )
        .await
        {
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to prepare task arena");
                (TaskStatus::Failed, None, Some(e.to_string()), 0, Vec::new())
            }
            Ok(arena) => {
                let unknown = arena.unknown_skills().to_vec();
                let core = AgentCore::new(
                    Arc::clone(&self.inner.llm),
                    arena.registry(),
                    self.inner.config.agent.clone(),
                )
                .with_events(events);
                let mut ctx = AgentContext::for_objective(
                    task_id.clone(),
                    arena.workdir(),
                    &self.inner.config.agent.system_prompt,
                    &req.description,
                    req.context.as_deref(),
                )
                .with_abort(abort.clone());

                let outcome = AssertUnwindSafe(core.run(&mut ctx)).catch_unwind().await;
                drop(ctx);
                drop(core);
                arena.release().await;

                match outcome {
                    Ok(outcome) => {
                        let status = match outcome.state {
                            AgentState::Done => TaskStatus::Completed,
                            AgentState::Aborted if timed_out.load(Ordering::SeqCst) => {
                                TaskStatus::Timeout
                            }
                            AgentState::Aborted => TaskStatus::Cancelled,
                            _ => TaskStatus::Failed,
                        };
                        let error = match status {
                            TaskStatus::Timeout => Some(
                                TaskError::Timeout {
                                    id: task_id.clone(),
                                    ttl,
                                }
                                .to_string(),
                            ),
                            TaskStatus::Cancelled => Some("cancelled".to_string()),
                            _ => outcome.error,
                        };
                        (status, outcome.result, error, outcome.iterations, unknown)
                    }
                    Err(_) => {
                        tracing::error!(task_id = %task_id, "Agent run panicked");
                        (
                            TaskStatus::Failed,
                            None,
                            Some("agent run panicked".to_string()),
                            0,
                            unknown,
                        )
                    }
                }
            }
        };
        watchdog.abort();

        // Store the result and free the slot together.
        let mut active = self.inner.active.lock().await;
        {
            let mut records = self.inner.records.write().await;
            if let Some(record) = records.get_mut(&task_id) {
                if let Err(e) = record.task.finish(status, result, error) {
                    tracing::warn!(task_id = %task_id, error = %e, "Could not record terminal status");
                }
                record.iterations = iterations;
                record.unknown_skills = unknown_skills;
                record.finished_at = Some(Instant::now());
            }
        }
        if active.as_ref().is_some_and(|a| a.task_id == task_id) {
            *active = None;
        }
        drop(active);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match status {
            TaskStatus::Completed => {
                tracing::info!(task_id = %task_id, iterations, elapsed_ms, "Task completed")
            }
            _ => tracing::warn!(task_id = %task_id, status = %status, iterations, elapsed_ms, "Task ended without completing"),
        }
    }

    /// Current view of a task. Reading a terminal result starts its
    /// retrieval grace period; repeated reads return the same body.
    pub async fn result(&self, task_id: &str) -> Option<TaskResultResponse> {
        let mut records = self.inner.records.write().await;
        let record = records.get_mut(task_id)?;
        if record.task.status.is_terminal() && record.first_retrieved.is_none() {
            record.first_retrieved = Some(Instant::now());
        }
        Some(record.to_response())
    }

    /// Request a cooperative abort. Advisory: the task may still complete.
    pub async fn cancel(&self, task_id: &str) -> Result<CancelResponse, TaskError> {
        let active = self.inner.active.lock().await;
        let status = self
            .inner
            .records
            .read()
            .await
            .get(task_id)
            .map(|r| r.task.status)
            .ok_or_else(|| TaskError::NotFound {
                id: task_id.to_string(),
            })?;

        match active.as_ref() {
            Some(current) if current.task_id == task_id => {
                current.abort.cancel();
                tracing::info!(task_id, "Cancellation requested");
                Ok(CancelResponse {
                    success: true,
                    status,
                })
            }
            _ => Ok(CancelResponse {
                success: false,
                status,
            }),
        }
    }

    pub async fn current_task(&self) -> Option<String> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.task_id.clone())
    }

    pub async fn status(&self) -> WorkerStatusResponse {
        let current_task = self.current_task().await;
        WorkerStatusResponse {
            worker_id: self.worker_id().to_string(),
            status: if current_task.is_some() {
                WorkerActivity::Busy
            } else {
                WorkerActivity::Idle
            },
            current_task,
            total_tasks: self.inner.total_tasks.load(Ordering::Relaxed),
            skills: self.inner.catalog.names(),
        }
    }

    /// Event log of a known task.
    pub async fn events(&self, task_id: &str) -> Option<Vec<RecordedEvent>> {
        self.inner
            .records
            .read()
            .await
            .get(task_id)
            .map(|r| r.events.snapshot())
    }

    /// Drop result records whose retention or retrieval grace has passed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let retention = self.inner.config.result_retention;
        let grace = self.inner.config.retrieval_grace;
        let mut records = self.inner.records.write().await;
        let before = records.len();
        records.retain(|id, record| {
            let keep = !record.expired(now, retention, grace);
            if !keep {
                tracing::debug!(task_id = %id, "Evicting task record");
            }
            keep
        });
        before - records.len()
    }

    /// Periodically evict expired records until `shutdown` fires.
    pub fn spawn_janitor(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let interval = self.inner.config.janitor_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = this.evict_expired().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "Janitor evicted task records");
                        }
                    }
                }
            }
        })
    }

    /// Abort whatever is running, for shutdown.
    pub async fn abort_current(&self) {
        if let Some(ref current) = *self.inner.active.lock().await {
            current.abort.cancel();
        }
    }
}
