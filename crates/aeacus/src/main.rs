//! Aeacus - Submission Execution Worker for Agora
//!
//! Drains the shared submission queue with a set of processor loops, runs each
//! submission through its execution strategy locally or on a remote worker, and
//! publishes exactly one outcome per submission.

mod config;
mod metrics;
mod processing;
mod processor;
mod publisher;
mod queue;
mod remote;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agora_strategies::sql::PgSqlBackend;
use agora_strategies::{LocalProcessExecutor, StrategyFactory, StrategyRegistry, StrategySettings};
use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::metrics::MetricsServer;
use crate::processing::{Admission, QueueProcessingFactory};
use crate::processor::{Backend, LocalBackend, SubmissionProcessor};
use crate::publisher::RedisResultPublisher;
use crate::queue::RedisSubmissionQueue;
use crate::remote::{HttpTransport, RemoteBackend, RemoteWorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aeacus=debug,agora_strategies=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("Panic: {}", info);
    }));

    tracing::info!("Starting Aeacus Execution Worker");

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Environment: {}", config.environment);

    // Create Redis pool
    tracing::info!("Connecting to Redis...");
    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    tracing::info!("Redis connected");

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work directory {}", config.work_dir.display()))?;

    let registry = Arc::new(StrategyRegistry::standard());
    let mut strategies = StrategyFactory::new(
        StrategySettings::from_env(),
        Arc::new(LocalProcessExecutor::default()),
    );
    match (&config.database_url, &config.database_learner_url) {
        (Some(admin_url), Some(learner_url)) => {
            tracing::info!("Connecting to database...");
            let backend = PgSqlBackend::connect(admin_url, learner_url, config.database_max_connections)
                .await
                .context("Failed to connect to the database")?;
            strategies = strategies.with_sql(Arc::new(backend));
            tracing::info!("Database connected");
        }
        (Some(_), None) => {
            tracing::warn!("DATABASE_LEARNER_URL is not set, database strategies are disabled");
        }
        _ => {}
    }

    // Create shutdown signal
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // Setup signal handlers
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        tracing::info!("Shutdown signal received, finishing current submissions...");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    // Start metrics server
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = MetricsServer::run(metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let queue = Arc::new(RedisSubmissionQueue::new(
        redis_pool.clone(),
        config.submission_queue.clone(),
    ));
    let publisher = Arc::new(RedisResultPublisher::new(redis_pool, config.result_stream.clone()));
    let queue_lock = Arc::new(tokio::sync::Mutex::new(()));
    let processing = |admission: Admission| {
        Arc::new(QueueProcessingFactory::new(
            queue.clone(),
            publisher.clone(),
            queue_lock.clone(),
            admission,
            config.job_loop_wait_time,
        ))
    };

    let mut processors = Vec::new();

    let local = Arc::new(LocalBackend::new(registry.clone(), strategies, config.work_dir.clone()));
    for i in 0..config.local_processors {
        let admission = if config.remote_enabled() {
            Admission::LocalOnly(registry.clone())
        } else {
            Admission::All
        };
        processors.push(SubmissionProcessor::new(
            format!("{}-local-{}", config.worker_name, i),
            processing(admission),
            Backend::Local(local.clone()),
            shutdown.clone(),
        ));
    }

    if config.remote_enabled() {
        let pool = RemoteWorkerPool::new(config.remote_worker_endpoints.clone());
        tracing::info!("Remote delegation enabled with {} workers", pool.capacity());
        let transport = Arc::new(HttpTransport::new(config.remote_request_timeout)?);
        processors.push(SubmissionProcessor::new(
            format!("{}-remote", config.worker_name),
            processing(Admission::RemoteOnly(registry.clone())),
            Backend::Remote(Arc::new(RemoteBackend::new(pool, transport))),
            shutdown.clone(),
        ));
    }

    tracing::info!("Aeacus ready, starting {} processors", processors.len());

    let mut running = JoinSet::new();
    for processor in processors {
        running.spawn(async move { processor.start().await });
    }

    // The first fatal failure stops every other loop; the host restarts the process
    let mut fatal = None;
    while let Some(joined) = running.join_next().await {
        let outcome = joined
            .context("Processor task panicked")
            .and_then(|result| result);
        if let Err(e) = outcome {
            tracing::error!("Processor stopped on fatal error: {:#}", e);
            shutdown.store(true, Ordering::SeqCst);
            fatal.get_or_insert(e);
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }

    tracing::info!("Aeacus shutdown complete");
    Ok(())
}
