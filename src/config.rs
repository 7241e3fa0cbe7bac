//! Configuration types.
//!
//! Everything is environment-driven; there are no config files. Each struct
//! has a `Default` matching the documented defaults and a `from_env()` that
//! overrides from `TASKHIVE_*` variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// System prompt for worker-side agents when none is configured.
pub const DEFAULT_WORKER_PROMPT: &str = "You are a task execution agent running on a worker node. \
Complete the task using the tools you have been given. When you are done, reply with the final \
answer as plain text and do not call any more tools. If a tool returns an error, read it and try \
again with corrected arguments.";

/// System prompt for the coordinator's local agent.
pub const DEFAULT_MASTER_PROMPT: &str = "You are the coordinating assistant. Answer the request \
directly and concisely. When you have the answer, reply with plain text.";

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_bind(default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = std::env::var("TASKHIVE_BIND").unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: "TASKHIVE_BIND".to_string(),
        message: format!("{raw}: {e}"),
    })
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

/// Which process this binary runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Master,
}

impl Role {
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var("TASKHIVE_ROLE")
            .unwrap_or_else(|_| "worker".to_string())
            .to_lowercase()
            .as_str()
        {
            "worker" => Ok(Self::Worker),
            "master" => Ok(Self::Master),
            other => Err(ConfigError::InvalidValue {
                key: "TASKHIVE_ROLE".to_string(),
                message: format!("expected 'worker' or 'master', got '{other}'"),
            }),
        }
    }
}

/// Agent Core configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Iteration cap; reaching it without completion fails the run.
    pub max_iterations: u32,
    pub system_prompt: String,
    /// Pause between iterations.
    pub iteration_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            system_prompt: DEFAULT_WORKER_PROMPT.to_string(),
            iteration_delay: Duration::ZERO,
        }
    }
}

impl AgentConfig {
    fn from_env_with_prompt(default_prompt: &str) -> Result<Self, ConfigError> {
        let system_prompt = match std::env::var("TASKHIVE_SYSTEM_PROMPT_FILE") {
            Ok(path) => std::fs::read_to_string(&path)?,
            Err(_) => default_prompt.to_string(),
        };
        Ok(Self {
            max_iterations: env_parse("TASKHIVE_MAX_ITERATIONS").unwrap_or(10),
            system_prompt,
            iteration_delay: Duration::ZERO,
        })
    }
}

/// Worker node configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub bind: SocketAddr,
    /// Parent of per-task scratch directories.
    pub workspace_root: PathBuf,
    /// TTL applied when a task request does not carry one.
    pub default_ttl: Duration,
    /// How long a terminal result stays readable after completion.
    pub result_retention: Duration,
    /// How long a terminal result stays readable after its first retrieval.
    pub retrieval_grace: Duration,
    /// How often the janitor sweeps expired results.
    pub janitor_interval: Duration,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", hostname()),
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            workspace_root: std::env::temp_dir().join("taskhive"),
            default_ttl: Duration::from_secs(300),
            result_retention: Duration::from_secs(600),
            retrieval_grace: Duration::from_secs(60),
            janitor_interval: Duration::from_secs(5),
            agent: AgentConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            worker_id: std::env::var("TASKHIVE_WORKER_ID").unwrap_or(defaults.worker_id),
            bind: env_bind("0.0.0.0:5000")?,
            workspace_root: std::env::var("TASKHIVE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            default_ttl: env_secs("TASKHIVE_DEFAULT_TTL_SECS", defaults.default_ttl),
            result_retention: env_secs(
                "TASKHIVE_RESULT_RETENTION_SECS",
                defaults.result_retention,
            ),
            retrieval_grace: env_secs("TASKHIVE_RETRIEVAL_GRACE_SECS", defaults.retrieval_grace),
            janitor_interval: defaults.janitor_interval,
            agent: AgentConfig::from_env_with_prompt(DEFAULT_WORKER_PROMPT)?,
            llm: LlmConfig::from_env(),
        })
    }
}

/// A statically known worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub id: String,
    /// Base URL, e.g. `http://10.0.0.5:5000`.
    pub url: String,
}

/// Parse `id=url,id=url`. A bare `url` entry gets a positional id.
pub fn parse_workers(raw: &str) -> Result<Vec<WorkerEndpoint>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, entry)| {
            let (id, url) = match entry.split_once('=') {
                Some((id, url)) => (id.trim().to_string(), url.trim().to_string()),
                None => (format!("worker-{}", i + 1), entry.to_string()),
            };
            if id.is_empty() || !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    key: "TASKHIVE_WORKERS".to_string(),
                    message: format!("bad worker entry '{entry}'"),
                });
            }
            Ok(WorkerEndpoint {
                id,
                url: url.trim_end_matches('/').to_string(),
            })
        })
        .collect()
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: Vec<WorkerEndpoint>,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub health_interval: Duration,
    /// Dispatch attempts across workers before reporting exhaustion.
    pub max_dispatch_attempts: u32,
    /// Consecutive failed probes/dispatches before a worker is offline.
    pub offline_threshold: u32,
    /// Timeout for a single dispatch/poll/cancel request.
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            probe_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_secs(2),
            health_interval: Duration::from_secs(30),
            max_dispatch_attempts: 3,
            offline_threshold: 1,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let workers = match std::env::var("TASKHIVE_WORKERS") {
            Ok(raw) => parse_workers(&raw)?,
            Err(_) => Vec::new(),
        };
        Ok(Self {
            workers,
            ..Self::default()
        })
    }
}

/// Planner configuration.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Ask the LLM to classify when the keyword heuristic is inconclusive.
    pub llm_classification: bool,
    /// Ask the LLM to decompose complex objectives.
    pub llm_decomposition: bool,
    pub subtask_ttl: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            llm_classification: true,
            llm_decomposition: true,
            subtask_ttl: Duration::from_secs(300),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind: SocketAddr,
    pub pool: PoolConfig,
    pub planner: PlannerConfig,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    /// Scratch root for the local agent.
    pub workspace_root: PathBuf,
    /// Retries for subtasks that timed out or could not be delivered.
    pub max_subtask_retries: u32,
    /// Run undeliverable subtasks on the local agent.
    pub local_fallback: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            pool: PoolConfig::default(),
            planner: PlannerConfig::default(),
            agent: AgentConfig {
                system_prompt: DEFAULT_MASTER_PROMPT.to_string(),
                ..AgentConfig::default()
            },
            llm: LlmConfig::default(),
            workspace_root: std::env::temp_dir().join("taskhive-master"),
            max_subtask_retries: 1,
            local_fallback: true,
        }
    }
}

impl MasterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut planner = PlannerConfig::default();
        planner.subtask_ttl = env_secs("TASKHIVE_DEFAULT_TTL_SECS", planner.subtask_ttl);
        Ok(Self {
            bind: env_bind("0.0.0.0:8080")?,
            pool: PoolConfig::from_env()?,
            planner,
            agent: AgentConfig::from_env_with_prompt(DEFAULT_MASTER_PROMPT)?,
            llm: LlmConfig::from_env(),
            workspace_root: std::env::var("TASKHIVE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            max_subtask_retries: defaults.max_subtask_retries,
            local_fallback: defaults.local_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worker_list() {
        let workers =
            parse_workers("pi1=http://10.0.0.5:5000/, pi2=http://10.0.0.6:5000,,").unwrap();
        assert_eq!(
            workers,
            vec![
                WorkerEndpoint {
                    id: "pi1".into(),
                    url: "http://10.0.0.5:5000".into()
                },
                WorkerEndpoint {
                    id: "pi2".into(),
                    url: "http://10.0.0.6:5000".into()
                },
            ]
        );
    }

    #[test]
    fn bare_urls_get_positional_ids() {
        let workers = parse_workers("http://a:1,http://b:2").unwrap();
        assert_eq!(workers[0].id, "worker-1");
        assert_eq!(workers[1].id, "worker-2");
    }

    #[test]
    fn rejects_non_http_entries() {
        assert!(parse_workers("pi1=10.0.0.5:5000").is_err());
        assert!(parse_workers("=http://x").is_err());
    }

    #[test]
    fn defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.probe_timeout, Duration::from_secs(3));
        assert_eq!(pool.max_dispatch_attempts, 3);
        assert_eq!(pool.offline_threshold, 1);

        let worker = WorkerConfig::default();
        assert_eq!(worker.bind.port(), 5000);
        assert_eq!(worker.retrieval_grace, Duration::from_secs(60));
        assert!(worker.worker_id.starts_with("worker-"));

        let master = MasterConfig::default();
        assert_eq!(master.bind.port(), 8080);
        assert_eq!(master.max_subtask_retries, 1);
        assert_eq!(master.agent.max_iterations, 10);
    }
}
