//! Coordinator side: planning, the worker pool, and objective execution.

pub mod client;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod routes;

pub use client::WorkerClient;
pub use orchestrator::{ObjectiveReport, Orchestrator, SubtaskReport};
pub use planner::{Complexity, SubTask, TaskPlan, TaskPlanner};
pub use pool::{PoolSummary, RemoteRun, WorkerInfo, WorkerPool, WorkerState};
pub use routes::master_routes;
