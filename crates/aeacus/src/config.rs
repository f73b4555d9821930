//! Configuration for the Aeacus worker service

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Aeacus configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (development, staging, production)
    pub environment: String,

    /// Name prefix for processor loops and log lines
    pub worker_name: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Redis list holding pending submissions
    pub submission_queue: String,

    /// Redis stream receiving outcome records
    pub result_stream: String,

    /// Number of local processor loops
    pub local_processors: usize,

    /// Idle sleep between polls of an empty queue
    pub job_loop_wait_time: Duration,

    /// Remote execution endpoints; empty disables remote delegation
    pub remote_worker_endpoints: Vec<String>,

    /// Timeout for one remote execution call
    pub remote_request_timeout: Duration,

    /// Root for per-execution working directories
    pub work_dir: PathBuf,

    /// Administrative PostgreSQL URL for database strategies
    pub database_url: Option<String>,

    /// Restricted login that runs learner scripts
    pub database_learner_url: Option<String>,

    /// Connections kept for database strategies
    pub database_max_connections: u32,

    /// Prometheus metrics port
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            worker_name: lookup("WORKER_NAME").unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("aeacus_{}", &id[..8])
            }),
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            submission_queue: lookup("SUBMISSION_QUEUE")
                .unwrap_or_else(|| "submission_queue".to_string()),
            result_stream: lookup("RESULT_STREAM").unwrap_or_else(|| "submission_results".to_string()),
            local_processors: parsed("LOCAL_PROCESSORS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(2),
            job_loop_wait_time: Duration::from_millis(parsed("JOB_LOOP_WAIT_TIME_MS").unwrap_or(1000)),
            remote_worker_endpoints: lookup("REMOTE_WORKER_ENDPOINTS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            remote_request_timeout: Duration::from_secs(
                parsed("REMOTE_REQUEST_TIMEOUT_SECS").unwrap_or(120),
            ),
            work_dir: PathBuf::from(
                lookup("WORK_DIR").unwrap_or_else(|| "/tmp/aeacus".to_string()),
            ),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            database_learner_url: lookup("DATABASE_LEARNER_URL").filter(|v| !v.trim().is_empty()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                .map(|n| n as u32)
                .unwrap_or(5),
            metrics_port: parsed("METRICS_PORT").map(|p| p as u16).unwrap_or(9092),
        }
    }

    pub fn remote_enabled(&self) -> bool {
        !self.remote_worker_endpoints.is_empty()
    }
}
