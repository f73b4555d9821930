//! Free/busy bookkeeping for remote workers

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agora_common::{JudgeError, JudgeResult};

use crate::metrics::REMOTE_WORKERS_BUSY;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteWorker {
    endpoint: String,
}

impl RemoteWorker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<RemoteWorker>,
    busy: HashSet<RemoteWorker>,
}

/// A fixed set of endpoints, each either free or busy.
///
/// Both sets live behind one mutex, so a worker moves between them atomically.
#[derive(Debug)]
pub struct RemoteWorkerPool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl RemoteWorkerPool {
    pub fn new(endpoints: impl IntoIterator<Item = String>) -> Arc<Self> {
        let mut seen = HashSet::new();
        let free: Vec<RemoteWorker> = endpoints
            .into_iter()
            .filter(|e| seen.insert(e.clone()))
            .map(RemoteWorker::new)
            .collect();

        Arc::new(Self {
            capacity: free.len(),
            state: Mutex::new(PoolState {
                free,
                busy: HashSet::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a free worker to busy. The lease returns it when dropped.
    pub fn acquire(self: &Arc<Self>) -> JudgeResult<WorkerLease> {
        let mut state = self.state();
        let worker = state.free.pop().ok_or(JudgeError::NoWorkerAvailable)?;
        state.busy.insert(worker.clone());
        REMOTE_WORKERS_BUSY.set(state.busy.len() as i64);

        Ok(WorkerLease {
            pool: self.clone(),
            worker: Some(worker),
        })
    }

    fn release(&self, worker: RemoteWorker) {
        let mut state = self.state();
        if state.busy.remove(&worker) {
            state.free.push(worker);
        } else {
            tracing::warn!(endpoint = %worker.endpoint, "Released a worker that was not busy");
        }
        REMOTE_WORKERS_BUSY.set(state.busy.len() as i64);
    }

    /// Copy of (free, busy) taken under the lock
    #[cfg(test)]
    pub fn snapshot(&self) -> (Vec<RemoteWorker>, Vec<RemoteWorker>) {
        let state = self.state();
        (state.free.clone(), state.busy.iter().cloned().collect())
    }
}

/// Exclusive use of one worker
#[derive(Debug)]
pub struct WorkerLease {
    pool: Arc<RemoteWorkerPool>,
    worker: Option<RemoteWorker>,
}

impl WorkerLease {
    pub fn endpoint(&self) -> &str {
        self.worker.as_ref().map(RemoteWorker::endpoint).unwrap_or_default()
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.release(worker);
        }
    }
}
