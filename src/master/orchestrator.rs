//! Objective → plan → local run or wave-parallel dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentContext, AgentCore, AgentState};
use crate::config::MasterConfig;
use crate::llm::LlmProvider;
use crate::master::planner::{SubTask, TaskPlan, TaskPlanner, detect_skills};
use crate::master::pool::WorkerPool;
use crate::protocol::TaskRequest;
use crate::task::TaskStatus;
use crate::tools::SkillCatalog;
use crate::worker::TaskArena;
use crate::workspace::WorkspaceRoot;

/// Worker label used for work the coordinator ran itself.
pub const LOCAL_WORKER: &str = "local";

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskReport {
    pub id: String,
    pub objective: String,
    pub skills: Vec<String>,
    pub status: TaskStatus,
    pub worker: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_skills: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveReport {
    pub objective_id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub plan: TaskPlan,
    pub subtasks: Vec<SubtaskReport>,
    pub elapsed_ms: u64,
}

struct LocalOutcome {
    status: TaskStatus,
    result: Option<String>,
    error: Option<String>,
}

pub struct Orchestrator {
    planner: TaskPlanner,
    pool: Arc<WorkerPool>,
    llm: Arc<dyn LlmProvider>,
    catalog: SkillCatalog,
    workspace_root: WorkspaceRoot,
    config: MasterConfig,
}

impl Orchestrator {
    pub fn new(config: MasterConfig, llm: Arc<dyn LlmProvider>, pool: Arc<WorkerPool>) -> Self {
        Self {
            planner: TaskPlanner::new(Some(Arc::clone(&llm)), config.planner.clone()),
            pool,
            llm,
            catalog: SkillCatalog::builtin(),
            workspace_root: WorkspaceRoot::new(config.workspace_root.clone()),
            config,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub async fn run_objective(&self, objective: &str, context: Option<&str>) -> ObjectiveReport {
        let start = Instant::now();
        let objective_id = uuid::Uuid::new_v4().to_string();
        let idle = self.pool.idle_count().await;
        let plan = self.planner.analyze(objective, context, idle).await;
        tracing::info!(objective_id = %objective_id, reasoning = %plan.reasoning, "Objective planned");

        let (status, result, error, subtasks) = if plan.handle_locally {
            let local = self
                .run_local(&objective_id, objective, &detect_skills(objective), context)
                .await;
            (local.status, local.result, local.error, Vec::new())
        } else {
            match plan.execution_waves() {
                Ok(waves) => {
                    let reports = self.run_waves(&objective_id, waves, context).await;
                    let (status, result, error) = summarize(&reports);
                    (status, result, error, reports)
                }
                Err(e) => {
                    tracing::warn!(objective_id = %objective_id, error = %e, "Plan not executable, running locally");
                    let local = self
                        .run_local(&objective_id, objective, &detect_skills(objective), context)
                        .await;
                    (local.status, local.result, local.error, Vec::new())
                }
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(objective_id = %objective_id, status = %status, elapsed_ms, "Objective finished");
        ObjectiveReport {
            objective_id,
            status,
            result,
            error,
            plan,
            subtasks,
            elapsed_ms,
        }
    }

    async fn run_waves(
        &self,
        objective_id: &str,
        waves: Vec<Vec<&SubTask>>,
        context: Option<&str>,
    ) -> Vec<SubtaskReport> {
        let mut done: HashMap<String, SubtaskReport> = HashMap::new();
        let mut order = Vec::new();

        for wave in waves {
            let prepared: Vec<(&SubTask, Option<String>, Option<String>)> = wave
                .into_iter()
                .map(|sub| {
                    let blocked = sub
                        .depends_on
                        .iter()
                        .find(|d| {
                            done.get(d.as_str())
                                .is_none_or(|r| r.status != TaskStatus::Completed)
                        })
                        .cloned();
                    (sub, blocked, dependency_context(sub, &done, context))
                })
                .collect();
            let runs = prepared
                .into_iter()
                .map(|(sub, blocked, background)| async move {
                    match blocked {
                        Some(dep) => skipped(sub, &dep),
                        None => self.run_subtask(objective_id, sub, background).await,
                    }
                });
            for report in futures::future::join_all(runs).await {
                order.push(report.id.clone());
                done.insert(report.id.clone(), report);
            }
        }

        order
            .into_iter()
            .filter_map(|id| done.remove(&id))
            .collect()
    }

    async fn run_subtask(
        &self,
        objective_id: &str,
        sub: &SubTask,
        background: Option<String>,
    ) -> SubtaskReport {
        let ttl = self.config.planner.subtask_ttl;
        let mut attempts = 0;
        loop {
            let task_id = match attempts {
                0 => format!("{objective_id}-{}", sub.id),
                n => format!("{objective_id}-{}-r{n}", sub.id),
            };
            attempts += 1;
            let req = TaskRequest {
                task_id: task_id.clone(),
                description: sub.objective.clone(),
                skills: sub.skills.clone(),
                ttl_secs: Some(ttl.as_secs().max(1)),
                context: background.clone(),
            };
            let retries_left = attempts <= self.config.max_subtask_retries;

            match self.pool.run_subtask(req, ttl).await {
                Ok(run) if run.task.status == TaskStatus::Timeout && retries_left => {
                    tracing::warn!(task_id = %task_id, worker = %run.worker_id, "Subtask timed out, retrying");
                }
                Ok(run) => {
                    return SubtaskReport {
                        id: sub.id.clone(),
                        objective: sub.objective.clone(),
                        skills: sub.skills.clone(),
                        status: run.task.status,
                        worker: Some(run.worker_id),
                        result: run.task.result().map(str::to_string),
                        error: run.task.error.clone(),
                        attempts,
                        unknown_skills: run.unknown_skills,
                    };
                }
                Err(e) if retries_left => {
                    tracing::warn!(task_id = %task_id, error = %e, "Subtask undeliverable, retrying");
                    tokio::time::sleep(self.pool.config().poll_interval).await;
                }
                Err(e) if self.config.local_fallback => {
                    tracing::warn!(task_id = %task_id, error = %e, "Subtask undeliverable, running locally");
                    let local = self
                        .run_local(&task_id, &sub.objective, &sub.skills, background.as_deref())
                        .await;
                    return SubtaskReport {
                        id: sub.id.clone(),
                        objective: sub.objective.clone(),
                        skills: sub.skills.clone(),
                        status: local.status,
                        worker: Some(LOCAL_WORKER.to_string()),
                        result: local.result,
                        error: local.error,
                        attempts,
                        unknown_skills: Vec::new(),
                    };
                }
                Err(e) => {
                    tracing::error!(task_id = %task_id, error = %e, "Subtask undeliverable");
                    return SubtaskReport {
                        id: sub.id.clone(),
                        objective: sub.objective.clone(),
                        skills: sub.skills.clone(),
                        status: TaskStatus::Failed,
                        worker: None,
                        result: None,
                        error: Some(e.to_string()),
                        attempts,
                        unknown_skills: Vec::new(),
                    };
                }
            }
        }
    }

    /// Run on the coordinator's own Agent Core, in an arena of its own.
    async fn run_local(
        &self,
        task_id: &str,
        objective: &str,
        skills: &[String],
        context: Option<&str>,
    ) -> LocalOutcome {
        let arena = match TaskArena::build(task_id, skills, &self.catalog, &self.workspace_root).await
        {
            Ok(arena) => arena,
            Err(e) => {
                return LocalOutcome {
                    status: TaskStatus::Failed,
                    result: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let ttl = self.config.planner.subtask_ttl;
        let abort = CancellationToken::new();
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = spawn_watchdog(ttl, abort.clone(), Arc::clone(&timed_out));

        let core = AgentCore::new(
            Arc::clone(&self.llm),
            arena.registry(),
            self.config.agent.clone(),
        );
        let mut ctx = AgentContext::for_objective(
            task_id,
            arena.workdir(),
            &self.config.agent.system_prompt,
            objective,
            context,
        )
        .with_abort(abort);
        let outcome = core.run(&mut ctx).await;
        watchdog.abort();
        drop(ctx);
        arena.release().await;

        let status = match outcome.state {
            AgentState::Done => TaskStatus::Completed,
            AgentState::Aborted if timed_out.load(Ordering::SeqCst) => TaskStatus::Timeout,
            AgentState::Aborted => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        };
        LocalOutcome {
            status,
            result: outcome.result,
            error: outcome.error,
        }
    }
}

fn spawn_watchdog(
    ttl: Duration,
    abort: CancellationToken,
    timed_out: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        timed_out.store(true, Ordering::SeqCst);
        abort.cancel();
    })
}

/// Results of a subtask's dependencies, prefixed with the caller's context.
fn dependency_context(
    sub: &SubTask,
    done: &HashMap<String, SubtaskReport>,
    context: Option<&str>,
) -> Option<String> {
    let mut parts: Vec<String> = context
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| vec![c.to_string()])
        .unwrap_or_default();
    for dep in &sub.depends_on {
        if let Some(report) = done.get(dep)
            && let Some(result) = report.result.as_deref()
        {
            parts.push(format!("Result of \"{}\":\n{result}", report.objective));
        }
    }
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn skipped(sub: &SubTask, dependency: &str) -> SubtaskReport {
    SubtaskReport {
        id: sub.id.clone(),
        objective: sub.objective.clone(),
        skills: sub.skills.clone(),
        status: TaskStatus::Cancelled,
        worker: None,
        result: None,
        error: Some(format!("skipped: dependency {dependency} did not complete")),
        attempts: 0,
        unknown_skills: Vec::new(),
    }
}

fn summarize(reports: &[SubtaskReport]) -> (TaskStatus, Option<String>, Option<String>) {
    let all_completed = reports.iter().all(|r| r.status == TaskStatus::Completed);
    let result = match reports {
        [only] => only.result.clone(),
        _ => {
            let lines: Vec<String> = reports
                .iter()
                .filter_map(|r| r.result.as_ref().map(|res| format!("[{}] {res}", r.id)))
                .collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
    };
    if all_completed {
        return (TaskStatus::Completed, result, None);
    }
    let failures: Vec<String> = reports
        .iter()
        .filter(|r| r.status != TaskStatus::Completed)
        .map(|r| format!("{} {}", r.id, r.status))
        .collect();
    let status = if reports.iter().any(|r| r.status == TaskStatus::Timeout)
        && reports
            .iter()
            .all(|r| matches!(r.status, TaskStatus::Completed | TaskStatus::Timeout | TaskStatus::Cancelled))
    {
        TaskStatus::Timeout
    } else {
        TaskStatus::Failed
    };
    (status, result, Some(failures.join(", ")))
}
