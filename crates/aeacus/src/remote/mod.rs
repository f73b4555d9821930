//! Delegation of remote-capable submissions to a bounded set of workers

mod pool;
mod transport;

use std::sync::Arc;
use std::time::Instant;

use agora_common::{ExecutionKind, JudgeError, Submission};
use anyhow::{Context, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::metrics;
use crate::processor::{JudgeOutcome, Stage, StageError};

pub use pool::RemoteWorkerPool;
pub use transport::{HttpTransport, RemoteTransport};

#[cfg(test)]
pub use transport::MockRemoteTransport;

/// Runs submissions on remote workers, never more at once than there are workers
pub struct RemoteBackend {
    pool: Arc<RemoteWorkerPool>,
    transport: Arc<dyn RemoteTransport>,
    permits: Arc<Semaphore>,
}

impl RemoteBackend {
    pub fn new(pool: Arc<RemoteWorkerPool>, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool.capacity())),
            pool,
            transport,
        }
    }

    /// Wait for a free execution slot
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .context("Remote admission closed")
    }

    pub async fn execute(&self, submission: &Submission) -> Result<JudgeOutcome, StageError> {
        if submission.execution_kind() != ExecutionKind::TestsExecution {
            return Err(Stage::Execute.fail(JudgeError::UnsupportedExecutionKind {
                strategy: submission.execution_strategy.clone(),
                kind: submission.execution_kind().to_string(),
            }));
        }

        let lease = self.pool.acquire().map_err(|e| Stage::Execute.fail(e))?;
        tracing::debug!(
            submission_id = %submission.id,
            endpoint = lease.endpoint(),
            "Delegating submission to remote worker"
        );

        let started = Instant::now();
        let result = self.transport.run_submission(lease.endpoint(), submission).await;
        drop(lease);
        metrics::record_execution("remote", started.elapsed().as_secs_f64());

        result
            .map(JudgeOutcome::Tests)
            .map_err(|e| Stage::Execute.fail(e))
    }
}
