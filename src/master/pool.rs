//! Worker Pool.
//!
//! Tracks the statically known worker set and is the only place that talks to
//! workers. Selection and reservation happen under one write lock, so two
//! concurrent dispatches never pick the same idle worker; a worker that is
//! busy anyway answers 409 and the pool reselects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, WorkerEndpoint};
use crate::error::DispatchError;
use crate::master::client::WorkerClient;
use crate::protocol::{HealthResponse, TaskRequest, TaskResultResponse, is_valid_task_id};
use crate::task::{Task, TaskStatus};

/// Pool-side view of a worker's availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    Offline,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// Everything the pool knows about one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: String,
    pub url: String,
    pub state: WorkerState,
    pub current_task: Option<String>,
    /// Skills advertised by the worker's `/status`; empty until first probed.
    pub skills: Vec<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub tasks_dispatched: u64,
    #[serde(skip)]
    last_assigned: Option<Instant>,
}

impl WorkerInfo {
    fn new(endpoint: WorkerEndpoint) -> Self {
        Self {
            id: endpoint.id,
            url: endpoint.url,
            state: WorkerState::Idle,
            current_task: None,
            skills: Vec::new(),
            last_health_check: None,
            consecutive_failures: 0,
            tasks_dispatched: 0,
            last_assigned: None,
        }
    }

    pub fn endpoint(&self) -> WorkerEndpoint {
        WorkerEndpoint {
            id: self.id.clone(),
            url: self.url.clone(),
        }
    }

    /// Whether the worker advertises every required skill.
    fn has_skills(&self, required: &[String]) -> bool {
        !required.is_empty() && required.iter().all(|s| self.skills.contains(s))
    }

    fn record_failure(&mut self, threshold: u32, reason: &str) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= threshold && self.state != WorkerState::Offline {
            tracing::warn!(
                worker = %self.id,
                failures = self.consecutive_failures,
                reason,
                "Worker marked offline"
            );
            self.state = WorkerState::Offline;
            self.current_task = None;
        }
    }

    fn record_health(&mut self, health: &HealthResponse) {
        if self.state == WorkerState::Offline {
            tracing::info!(worker = %self.id, "Worker back online");
        }
        self.consecutive_failures = 0;
        self.last_health_check = Some(Utc::now());
        self.current_task = health.current_task.clone();
        self.state = if self.current_task.is_some() {
            WorkerState::Busy
        } else {
            WorkerState::Idle
        };
    }

    fn release(&mut self, task_id: &str) {
        if self.state == WorkerState::Busy && self.current_task.as_deref() == Some(task_id) {
            self.state = WorkerState::Idle;
            self.current_task = None;
        }
    }
}

/// Best candidate among idle, non-excluded workers: skill affinity first,
/// then fewest dispatched tasks, then least recently assigned.
fn pick<'a>(
    workers: impl Iterator<Item = &'a WorkerInfo>,
    skills: &[String],
    exclude: &HashSet<String>,
) -> Option<&'a WorkerInfo> {
    workers
        .filter(|w| w.state == WorkerState::Idle && !exclude.contains(&w.id))
        .min_by(|a, b| {
            (!a.has_skills(skills), a.tasks_dispatched, a.last_assigned, &a.id).cmp(&(
                !b.has_skills(skills),
                b.tasks_dispatched,
                b.last_assigned,
                &b.id,
            ))
        })
}

fn check_task_id(task_id: &str) -> Result<(), DispatchError> {
    if is_valid_task_id(task_id) {
        Ok(())
    } else {
        Err(DispatchError::InvalidTaskId {
            task_id: task_id.to_string(),
        })
    }
}

/// Outcome of a remote subtask the pool drove to a terminal status.
#[derive(Debug, Clone)]
pub struct RemoteRun {
    pub worker_id: String,
    pub task: Task,
    pub unknown_skills: Vec<String>,
}

/// `status_summary()` body.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub offline: usize,
    pub workers: Vec<WorkerInfo>,
}

pub struct WorkerPool {
    config: PoolConfig,
    client: WorkerClient,
    workers: RwLock<HashMap<String, WorkerInfo>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, DispatchError> {
        let client = WorkerClient::new(config.request_timeout)?;
        let workers = config
            .workers
            .iter()
            .map(|ep| (ep.id.clone(), WorkerInfo::new(ep.clone())))
            .collect();
        Ok(Self {
            config,
            client,
            workers: RwLock::new(workers),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Add or replace a worker.
    pub async fn add_worker(&self, endpoint: WorkerEndpoint) {
        tracing::info!(worker = %endpoint.id, url = %endpoint.url, "Worker added");
        self.workers
            .write()
            .await
            .insert(endpoint.id.clone(), WorkerInfo::new(endpoint));
    }

    pub async fn remove_worker(&self, worker_id: &str) -> bool {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            tracing::info!(worker = %worker_id, "Worker removed");
        }
        removed
    }

    /// Snapshot of every worker, sorted by id.
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        let mut all: Vec<_> = self.workers.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn worker(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(worker_id).cloned()
    }

    pub async fn idle_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| w.state == WorkerState::Idle)
            .count()
    }

    /// Probe every worker concurrently. Unreachable workers go offline.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let targets: Vec<(WorkerEndpoint, bool)> = self
            .workers
            .read()
            .await
            .values()
            .map(|w| (w.endpoint(), w.skills.is_empty()))
            .collect();

        let probes = targets.into_iter().map(|(ep, want_skills)| async move {
            let outcome = tokio::time::timeout(
                self.config.probe_timeout,
                self.probe(&ep, want_skills),
            )
            .await
            .unwrap_or_else(|_| {
                Err(DispatchError::Network {
                    worker_id: ep.id.clone(),
                    reason: format!("probe timed out after {:?}", self.config.probe_timeout),
                })
            });
            (ep.id, outcome)
        });
        let outcomes = futures::future::join_all(probes).await;

        let mut results = HashMap::with_capacity(outcomes.len());
        let mut workers = self.workers.write().await;
        for (id, outcome) in outcomes {
            let Some(info) = workers.get_mut(&id) else {
                continue;
            };
            match outcome {
                Ok((health, skills)) => {
                    info.record_health(&health);
                    if let Some(skills) = skills {
                        info.skills = skills;
                    }
                    results.insert(id, true);
                }
                Err(e) => {
                    tracing::debug!(worker = %id, error = %e, "Health probe failed");
                    info.record_failure(self.config.offline_threshold, &e.to_string());
                    results.insert(id, false);
                }
            }
        }
        results
    }

    async fn probe(
        &self,
        ep: &WorkerEndpoint,
        want_skills: bool,
    ) -> Result<(HealthResponse, Option<Vec<String>>), DispatchError> {
        let health = self.client.health(ep, self.config.probe_timeout).await?;
        let skills = if want_skills {
            self.client
                .status(ep, self.config.probe_timeout)
                .await
                .ok()
                .map(|s| s.skills)
        } else {
            None
        };
        Ok((health, skills))
    }

    /// Preview which worker `dispatch` would pick. Does not reserve it.
    pub async fn select_worker(&self, skills: &[String]) -> Option<WorkerInfo> {
        let workers = self.workers.read().await;
        pick(workers.values(), skills, &HashSet::new()).cloned()
    }

    async fn reserve(
        &self,
        task_id: &str,
        skills: &[String],
        exclude: &HashSet<String>,
    ) -> Option<WorkerEndpoint> {
        let mut workers = self.workers.write().await;
        let id = pick(workers.values(), skills, exclude)?.id.clone();
        let info = workers.get_mut(&id)?;
        info.state = WorkerState::Busy;
        info.current_task = Some(task_id.to_string());
        info.last_assigned = Some(Instant::now());
        info.tasks_dispatched += 1;
        Some(info.endpoint())
    }

    async fn endpoint(&self, worker_id: &str) -> Result<WorkerEndpoint, DispatchError> {
        self.workers
            .read()
            .await
            .get(worker_id)
            .map(WorkerInfo::endpoint)
            .ok_or_else(|| DispatchError::UnknownWorker {
                worker_id: worker_id.to_string(),
            })
    }

    /// Single delivery attempt to a specific worker.
    ///
    /// A network failure is resolved by asking the worker whether the task
    /// landed anyway; only if that also fails is the attempt counted against
    /// the worker.
    pub async fn dispatch_to(&self, worker_id: &str, req: &TaskRequest) -> Result<(), DispatchError> {
        check_task_id(&req.task_id)?;
        let ep = self.endpoint(worker_id).await?;
        let outcome = match self.client.submit(&ep, req).await {
            Err(e) if e.is_network() => match self.client.result(&ep, &req.task_id).await {
                Ok(_) => {
                    tracing::info!(worker = %worker_id, task_id = %req.task_id, "Accept landed despite lost ack");
                    Ok(())
                }
                Err(_) => Err(e),
            },
            other => other,
        };

        let mut workers = self.workers.write().await;
        let Some(info) = workers.get_mut(worker_id) else {
            return outcome;
        };
        match &outcome {
            Ok(()) => {
                info.state = WorkerState::Busy;
                info.current_task = Some(req.task_id.clone());
                info.consecutive_failures = 0;
                tracing::info!(worker = %worker_id, task_id = %req.task_id, "Task dispatched");
            }
            Err(DispatchError::Busy { .. }) => {
                info.state = WorkerState::Busy;
                info.current_task = None;
                info.consecutive_failures = 0;
            }
            Err(e) if e.is_network() => {
                info.record_failure(self.config.offline_threshold, &e.to_string());
                info.release(&req.task_id);
            }
            Err(_) => info.release(&req.task_id),
        }
        outcome
    }

    /// Pick a worker and deliver, reselecting after busy or unreachable
    /// workers. Returns the id of the worker that accepted.
    pub async fn dispatch(&self, req: &TaskRequest) -> Result<String, DispatchError> {
        check_task_id(&req.task_id)?;
        let mut tried = HashSet::new();
        while tried.len() < self.config.max_dispatch_attempts as usize {
            let Some(ep) = self.reserve(&req.task_id, &req.skills, &tried).await else {
                break;
            };
            tried.insert(ep.id.clone());
            match self.dispatch_to(&ep.id, req).await {
                Ok(()) => return Ok(ep.id),
                Err(e @ DispatchError::Busy { .. }) | Err(e @ DispatchError::Network { .. }) => {
                    tracing::warn!(worker = %ep.id, task_id = %req.task_id, error = %e, "Dispatch attempt failed, reselecting");
                }
                Err(e) => return Err(e),
            }
        }
        if tried.is_empty() {
            Err(DispatchError::NoWorkersAvailable)
        } else {
            Err(DispatchError::Exhausted {
                attempts: tried.len() as u32,
            })
        }
    }

    /// Ask a worker for a task's current status.
    pub async fn poll(
        &self,
        worker_id: &str,
        task_id: &str,
    ) -> Result<TaskResultResponse, DispatchError> {
        let ep = self.endpoint(worker_id).await?;
        let outcome = self.client.result(&ep, task_id).await;

        let mut workers = self.workers.write().await;
        if let Some(info) = workers.get_mut(worker_id) {
            match &outcome {
                Ok(resp) => {
                    info.consecutive_failures = 0;
                    if resp.status.is_terminal() {
                        info.release(task_id);
                    }
                }
                Err(e) if e.is_network() => {
                    info.record_failure(self.config.offline_threshold, &e.to_string())
                }
                Err(_) => {}
            }
        }
        outcome
    }

    /// Best-effort cancel. `Ok(false)` means the worker had already finished.
    pub async fn cancel(&self, worker_id: &str, task_id: &str) -> Result<bool, DispatchError> {
        let ep = self.endpoint(worker_id).await?;
        let resp = self.client.cancel(&ep, task_id).await?;
        Ok(resp.success)
    }

    async fn release(&self, worker_id: &str, task_id: &str) {
        if let Some(info) = self.workers.write().await.get_mut(worker_id) {
            info.release(task_id);
        }
    }

    /// Worker currently reserved for `task_id`, if any.
    async fn reserved_for(&self, task_id: &str) -> Option<String> {
        self.workers
            .read()
            .await
            .values()
            .find(|w| w.current_task.as_deref() == Some(task_id))
            .map(|w| w.id.clone())
    }

    /// Dispatch and poll until terminal or until `ttl` of wall-clock time has
    /// passed, whatever the worker reports. On expiry the task is marked
    /// `Timeout` here and a cancel is sent without waiting for it.
    ///
    /// `Err` means the task was never delivered.
    pub async fn run_subtask(
        &self,
        req: TaskRequest,
        ttl: Duration,
    ) -> Result<RemoteRun, DispatchError> {
        let deadline = tokio::time::Instant::now() + ttl;
        let mut task = Task::new(req.task_id.clone(), req.description.clone(), ttl)
            .with_skills(req.skills.clone())
            .with_context(req.context.clone());

        let worker_id = match tokio::time::timeout_at(deadline, self.dispatch(&req)).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                // The deadline hit mid-delivery; blame the worker being tried.
                return match self.reserved_for(&req.task_id).await {
                    Some(worker_id) => Ok(self.expire(worker_id, task).await),
                    None => Err(DispatchError::Timeout {
                        task_id: req.task_id,
                        ttl,
                    }),
                };
            }
        };
        let _ = task.transition_to(TaskStatus::Dispatched, Some(format!("worker {worker_id}")));

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {}
            }

            match tokio::time::timeout_at(deadline, self.poll(&worker_id, &task.id)).await {
                Err(_) => break,
                Ok(Ok(resp)) => {
                    if resp.status.is_terminal() {
                        let _ = task.finish(resp.status, resp.result, resp.error);
                        return Ok(RemoteRun {
                            worker_id,
                            task,
                            unknown_skills: resp.unknown_skills,
                        });
                    }
                    if task.status.can_transition_to(resp.status) {
                        let _ = task.transition_to(resp.status, None);
                    }
                }
                Ok(Err(DispatchError::UnknownTask { .. })) => {
                    self.release(&worker_id, &task.id).await;
                    let _ = task.finish(
                        TaskStatus::Failed,
                        None,
                        Some(format!("worker {worker_id} lost track of the task")),
                    );
                    return Ok(RemoteRun {
                        worker_id,
                        task,
                        unknown_skills: Vec::new(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(worker = %worker_id, task_id = %task.id, error = %e, "Poll failed");
                }
            }
        }

        Ok(self.expire(worker_id, task).await)
    }

    /// Mark `task` timed out, free the worker, and send a cancel without
    /// waiting for it.
    async fn expire(&self, worker_id: String, mut task: Task) -> RemoteRun {
        let ttl = task.ttl;
        tracing::warn!(worker = %worker_id, task_id = %task.id, ttl_secs = ttl.as_secs_f64(), "Subtask timed out");
        let _ = task.finish(
            TaskStatus::Timeout,
            None,
            Some(format!("no terminal status within {ttl:?}")),
        );
        self.release(&worker_id, &task.id).await;
        if let Ok(ep) = self.endpoint(&worker_id).await {
            let client = self.client.clone();
            let task_id = task.id.clone();
            tokio::spawn(async move {
                if let Err(e) = client.cancel(&ep, &task_id).await {
                    tracing::debug!(worker = %ep.id, task_id = %task_id, error = %e, "Best-effort cancel failed");
                }
            });
        }
        RemoteRun {
            worker_id,
            task,
            unknown_skills: Vec::new(),
        }
    }

    pub async fn status_summary(&self) -> PoolSummary {
        let workers = self.workers().await;
        let count = |state| workers.iter().filter(|w| w.state == state).count();
        PoolSummary {
            total: workers.len(),
            idle: count(WorkerState::Idle),
            busy: count(WorkerState::Busy),
            offline: count(WorkerState::Offline),
            workers,
        }
    }

    /// Probe all workers every `health_interval` until `shutdown` fires.
    pub fn spawn_health_monitor(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let results = pool.health_check_all().await;
                        let healthy = results.values().filter(|ok| **ok).count();
                        tracing::debug!(healthy, total = results.len(), "Health sweep done");
                    }
                }
            }
            tracing::debug!("Health monitor stopped");
        })
    }
}
