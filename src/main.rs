use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use taskhive::config::{MasterConfig, Role, WorkerConfig};
use taskhive::llm::create_provider;
use taskhive::master::{Orchestrator, WorkerPool, master_routes};
use taskhive::tools::SkillCatalog;
use taskhive::worker::{TaskExecutor, worker_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    match Role::from_env()? {
        Role::Worker => run_worker().await,
        Role::Master => run_master().await,
    }
}

/// Stderr by default; a daily-rolling file when `TASKHIVE_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::env::var("TASKHIVE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "taskhive.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}

async fn run_worker() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let llm = create_provider(&config.llm)?;
    if config.llm.api_key.is_none() {
        tracing::warn!("TASKHIVE_LLM_API_KEY not set; LLM calls will likely be rejected");
    }

    eprintln!("taskhive worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worker ID: {}", config.worker_id);
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Listening: http://{}", config.bind);
    eprintln!("   Scratch: {}\n", config.workspace_root.display());

    let executor = TaskExecutor::new(config.clone(), llm, SkillCatalog::builtin());
    let shutdown = CancellationToken::new();
    let janitor = executor.spawn_janitor(shutdown.clone());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    axum::serve(listener, worker_routes(executor.clone()))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    executor.abort_current().await;
    shutdown.cancel();
    let _ = janitor.await;
    Ok(())
}

async fn run_master() -> anyhow::Result<()> {
    let config = MasterConfig::from_env()?;
    let llm = create_provider(&config.llm)?;
    if config.pool.workers.is_empty() {
        tracing::warn!("TASKHIVE_WORKERS is empty; every objective will run locally");
    }

    eprintln!("taskhive master v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Workers: {}", config.pool.workers.len());
    for w in &config.pool.workers {
        eprintln!("     - {} @ {}", w.id, w.url);
    }
    eprintln!("   Listening: http://{}\n", config.bind);

    let pool = Arc::new(WorkerPool::new(config.pool.clone())?);
    let shutdown = CancellationToken::new();
    let monitor = pool.spawn_health_monitor(shutdown.clone());
    let bind = config.bind;
    let orchestrator = Arc::new(Orchestrator::new(config, llm, pool));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    axum::serve(listener, master_routes(orchestrator))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = monitor.await;
    Ok(())
}
