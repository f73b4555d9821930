//! Submission processor loop
//!
//! A processor drains the shared queue one submission at a time. Every
//! retrieved submission ends in exactly one outcome: a test result set, a
//! single output result, or the processing strategy's error path. Only an
//! unreachable queue stops the loop.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use agora_common::{
    ExecutionResult, JudgeError, OutputResult, Submission, SubmissionInput, TestResult,
};
use agora_strategies::{ExecutionContext, StrategyFactory, StrategyRegistry};
use anyhow::Result;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::metrics::{self, ACTIVE_SUBMISSIONS};
use crate::processing::{ProcessingStrategyFactory, SubmissionProcessingStrategy};
use crate::remote::RemoteBackend;

/// Where a failure happened while handling one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BeforeExecute,
    CreateStrategy,
    BuildContext,
    Execute,
    ProcessResult,
}

impl Stage {
    pub fn fail(self, error: impl Into<anyhow::Error>) -> StageError {
        StageError {
            stage: self,
            message: format!("{:#}", error.into()),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::BeforeExecute => "preparing the submission",
            Stage::CreateStrategy => "creating execution strategy",
            Stage::BuildContext => "building the execution context",
            Stage::Execute => "executing the submission",
            Stage::ProcessResult => "processing the execution result",
        })
    }
}

#[derive(Debug, Error)]
#[error("Exception in {stage}: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

#[derive(Debug)]
pub enum JudgeOutcome {
    Tests(ExecutionResult<TestResult>),
    Output(ExecutionResult<OutputResult>),
}

/// Runs strategies in this process
pub struct LocalBackend {
    registry: Arc<StrategyRegistry>,
    strategies: StrategyFactory,
    work_root: PathBuf,
}

impl LocalBackend {
    pub fn new(registry: Arc<StrategyRegistry>, strategies: StrategyFactory, work_root: PathBuf) -> Self {
        Self {
            registry,
            strategies,
            work_root,
        }
    }

    pub async fn execute(&self, submission: &Submission) -> Result<JudgeOutcome, StageError> {
        let strategy_type = self.registry.resolve(&submission.execution_strategy);
        if !strategy_type.is_found() {
            return Err(Stage::CreateStrategy.fail(JudgeError::StrategyNotFound(
                submission.execution_strategy.clone(),
            )));
        }
        let strategy = self
            .strategies
            .create(strategy_type)
            .map_err(|e| Stage::CreateStrategy.fail(e))?;

        let started = Instant::now();
        let outcome = match &submission.input {
            SubmissionInput::Tests(input) => {
                let tests = strategy.tests().map_err(|e| Stage::CreateStrategy.fail(e))?;
                let context = ExecutionContext::new(submission, input.clone(), &self.work_root)
                    .map_err(|e| Stage::BuildContext.fail(e))?;
                tests
                    .execute_tests(&context)
                    .await
                    .map(JudgeOutcome::Tests)
                    .map_err(|e| Stage::Execute.fail(e))
            }
            SubmissionInput::Simple(input) => {
                let simple = strategy.simple().map_err(|e| Stage::CreateStrategy.fail(e))?;
                let context = ExecutionContext::new(submission, input.clone(), &self.work_root)
                    .map_err(|e| Stage::BuildContext.fail(e))?;
                simple
                    .execute_simple(&context)
                    .await
                    .map(JudgeOutcome::Output)
                    .map_err(|e| Stage::Execute.fail(e))
            }
        };
        metrics::record_execution(&strategy_type.to_string(), started.elapsed().as_secs_f64());

        outcome
    }
}

#[derive(Clone)]
pub enum Backend {
    Local(Arc<LocalBackend>),
    Remote(Arc<RemoteBackend>),
}

impl Backend {
    async fn execute(&self, submission: &Submission) -> Result<JudgeOutcome, StageError> {
        match self {
            Backend::Local(local) => local.execute(submission).await,
            Backend::Remote(remote) => remote.execute(submission).await,
        }
    }
}

pub struct SubmissionProcessor {
    name: String,
    processing: Arc<dyn ProcessingStrategyFactory>,
    backend: Backend,
    stop: Arc<AtomicBool>,
}

impl SubmissionProcessor {
    pub fn new(
        name: impl Into<String>,
        processing: Arc<dyn ProcessingStrategyFactory>,
        backend: Backend,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: name.into(),
            processing,
            backend,
            stop,
        }
    }

    /// Request the loop to end at the next iteration boundary
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run until stopped. Returns `Err` only when the queue is unreachable.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(processor = %self.name, "Processor started");

        let mut remote_tasks = JoinSet::new();
        let outcome = self.run(&mut remote_tasks).await;

        if !remote_tasks.is_empty() {
            tracing::info!(
                processor = %self.name,
                "Waiting for {} remote executions to finish",
                remote_tasks.len()
            );
        }
        while let Some(joined) = remote_tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(processor = %self.name, "Remote execution task failed: {}", e);
            }
        }

        tracing::info!(processor = %self.name, "Processor stopped");
        outcome
    }

    async fn run(&self, remote_tasks: &mut JoinSet<()>) -> Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            while let Some(joined) = remote_tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(processor = %self.name, "Remote execution task failed: {}", e);
                }
            }

            let permit = match &self.backend {
                Backend::Remote(remote) => Some(remote.admit().await?),
                Backend::Local(_) => None,
            };

            let processing = self.processing.create();
            let submission = match processing.retrieve_submission().await {
                Ok(submission) => submission,
                Err(e) => {
                    tracing::error!(processor = %self.name, "Unable to retrieve submission: {:#}", e);
                    return Err(e.context("Submission queue unavailable"));
                }
            };

            let Some(submission) = submission else {
                drop(permit);
                tokio::time::sleep(processing.job_loop_wait_time()).await;
                continue;
            };

            match permit {
                Some(permit) => {
                    let backend = self.backend.clone();
                    remote_tasks.spawn(async move {
                        handle_submission(processing.as_ref(), submission, &backend).await;
                        drop(permit);
                    });
                }
                None => handle_submission(processing.as_ref(), submission, &self.backend).await,
            }
        }

        Ok(())
    }
}

/// Execute one submission and route it to exactly one outcome
async fn handle_submission(
    processing: &dyn SubmissionProcessingStrategy,
    mut submission: Submission,
    backend: &Backend,
) {
    ACTIVE_SUBMISSIONS.inc();

    let executed = match processing.before_execute(&submission).await {
        Ok(()) => backend.execute(&submission).await,
        Err(e) => Err(Stage::BeforeExecute.fail(e)),
    };

    let handled = match executed {
        Ok(JudgeOutcome::Tests(result)) => processing
            .process_tests_result(&submission, result)
            .await
            .map_err(|e| Stage::ProcessResult.fail(e)),
        Ok(JudgeOutcome::Output(result)) => processing
            .process_output_result(&submission, result)
            .await
            .map_err(|e| Stage::ProcessResult.fail(e)),
        Err(e) => Err(e),
    };

    if let Err(error) = handled {
        tracing::error!(submission_id = %submission.id, stage = %error.stage, "{}", error);
        submission.processing_comment = Some(error.to_string());
        if let Err(e) = processing.on_error(&submission).await {
            tracing::error!(submission_id = %submission.id, "Unable to record failure: {:#}", e);
        }
    }

    tracing::info!(submission_id = %submission.id, "Work on submission ended");
    ACTIVE_SUBMISSIONS.dec();
}
