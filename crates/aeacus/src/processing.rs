//! Bookkeeping around each submission: retrieval, result handling, error path

use std::sync::Arc;
use std::time::Duration;

use agora_common::{ExecutionKind, ExecutionResult, OutputResult, Submission, TestResult};
use agora_strategies::StrategyRegistry;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::metrics::{self, SUBMISSIONS_FAILED, SUBMISSIONS_PROCESSED};
use crate::publisher::{OutcomeKind, OutcomeRecord, ResultPublisher};
use crate::queue::SubmissionQueue;

/// Collaborator invoked by a processor around every submission.
///
/// A processor builds a fresh instance per loop iteration, so implementations
/// may hold per-submission state.
#[async_trait]
pub trait SubmissionProcessingStrategy: Send + Sync {
    /// Idle sleep after an empty retrieval
    fn job_loop_wait_time(&self) -> Duration;

    /// Next submission for this processor. `Err` means the queue is unreachable.
    async fn retrieve_submission(&self) -> Result<Option<Submission>>;

    async fn before_execute(&self, submission: &Submission) -> Result<()>;

    async fn process_tests_result(
        &self,
        submission: &Submission,
        result: ExecutionResult<TestResult>,
    ) -> Result<()>;

    async fn process_output_result(
        &self,
        submission: &Submission,
        result: ExecutionResult<OutputResult>,
    ) -> Result<()>;

    /// Terminal error path; `processing_comment` carries the diagnostic
    async fn on_error(&self, submission: &Submission) -> Result<()>;
}

pub trait ProcessingStrategyFactory: Send + Sync {
    fn create(&self) -> Arc<dyn SubmissionProcessingStrategy>;
}

/// Which submissions a processor takes off the shared queue
#[derive(Debug, Clone)]
pub enum Admission {
    All,
    /// Everything a remote worker would not take
    LocalOnly(Arc<StrategyRegistry>),
    /// Tests-execution submissions whose strategy is remote capable
    RemoteOnly(Arc<StrategyRegistry>),
}

impl Admission {
    pub fn admits(&self, submission: &Submission) -> bool {
        match self {
            Admission::All => true,
            Admission::LocalOnly(registry) => !is_remote_eligible(registry, submission),
            Admission::RemoteOnly(registry) => is_remote_eligible(registry, submission),
        }
    }
}

pub fn is_remote_eligible(registry: &StrategyRegistry, submission: &Submission) -> bool {
    submission.execution_kind() == ExecutionKind::TestsExecution
        && registry.is_remote_capable(registry.resolve(&submission.execution_strategy))
}

/// Default processing strategy: shared queue in, outcome records out
pub struct QueueProcessingStrategy {
    queue: Arc<dyn SubmissionQueue>,
    publisher: Arc<dyn ResultPublisher>,
    lock: Arc<Mutex<()>>,
    admission: Admission,
    wait: Duration,
}

#[async_trait]
impl SubmissionProcessingStrategy for QueueProcessingStrategy {
    fn job_loop_wait_time(&self) -> Duration {
        self.wait
    }

    async fn retrieve_submission(&self) -> Result<Option<Submission>> {
        // Scan-then-remove must not interleave with another processor in this worker
        let _guard = self.lock.lock().await;

        let admission = &self.admission;
        let submission = self.queue.take_first(&|s| admission.admits(s)).await?;
        if submission.is_none() {
            tracing::trace!("No submission admitted by this processor");
        }
        Ok(submission)
    }

    async fn before_execute(&self, submission: &Submission) -> Result<()> {
        tracing::info!(
            submission_id = %submission.id,
            strategy = %submission.execution_strategy,
            tests = submission.test_count(),
            "Work on submission started"
        );
        Ok(())
    }

    async fn process_tests_result(
        &self,
        submission: &Submission,
        result: ExecutionResult<TestResult>,
    ) -> Result<()> {
        for test in result.results() {
            metrics::record_verdict(test.verdict.code());
        }
        let payload = serde_json::to_value(&result)?;
        self.publisher
            .publish(&OutcomeRecord::new(submission.id, OutcomeKind::Tests, payload))
            .await?;

        SUBMISSIONS_PROCESSED.inc();
        tracing::info!(
            submission_id = %submission.id,
            score = result.score(),
            "Submission successfully processed"
        );
        Ok(())
    }

    async fn process_output_result(
        &self,
        submission: &Submission,
        result: ExecutionResult<OutputResult>,
    ) -> Result<()> {
        for output in result.results() {
            metrics::record_verdict(output.verdict.code());
        }
        let payload = serde_json::to_value(&result)?;
        self.publisher
            .publish(&OutcomeRecord::new(submission.id, OutcomeKind::Output, payload))
            .await?;

        SUBMISSIONS_PROCESSED.inc();
        tracing::info!(submission_id = %submission.id, "Submission successfully processed");
        Ok(())
    }

    async fn on_error(&self, submission: &Submission) -> Result<()> {
        SUBMISSIONS_FAILED.inc();
        let payload = serde_json::json!({
            "processing_comment": submission.processing_comment,
        });
        self.publisher
            .publish(&OutcomeRecord::new(submission.id, OutcomeKind::Error, payload))
            .await
    }
}

/// Builds a [`QueueProcessingStrategy`] per loop iteration
pub struct QueueProcessingFactory {
    queue: Arc<dyn SubmissionQueue>,
    publisher: Arc<dyn ResultPublisher>,
    lock: Arc<Mutex<()>>,
    admission: Admission,
    wait: Duration,
}

impl QueueProcessingFactory {
    pub fn new(
        queue: Arc<dyn SubmissionQueue>,
        publisher: Arc<dyn ResultPublisher>,
        lock: Arc<Mutex<()>>,
        admission: Admission,
        wait: Duration,
    ) -> Self {
        Self {
            queue,
            publisher,
            lock,
            admission,
            wait,
        }
    }
}

impl ProcessingStrategyFactory for QueueProcessingFactory {
    fn create(&self) -> Arc<dyn SubmissionProcessingStrategy> {
        Arc::new(QueueProcessingStrategy {
            queue: self.queue.clone(),
            publisher: self.publisher.clone(),
            lock: self.lock.clone(),
            admission: self.admission.clone(),
            wait: self.wait,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use agora_common::{CheckerKind, SimpleInput, SubmissionInput, TestCase, TestsInput, Verdict};
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    use crate::queue::memory::InMemorySubmissionQueue;

    pub(crate) fn tests_submission(strategy: &str, code: &str) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            execution_strategy: strategy.to_string(),
            code: code.to_string(),
            file_content: None,
            time_limit_ms: 1000,
            memory_limit_bytes: 64 * 1024 * 1024,
            input: SubmissionInput::Tests(TestsInput {
                checker: CheckerKind::Trim,
                task_skeleton: None,
                tests: vec![TestCase {
                    id: 1,
                    input: String::new(),
                    expected_output: "42".into(),
                    is_trial_test: false,
                    order_by: 0,
                }],
            }),
            processing_comment: None,
        }
    }

    pub(crate) fn simple_submission(strategy: &str) -> Submission {
        Submission {
            input: SubmissionInput::Simple(SimpleInput {
                input: "1".into(),
                expected_output: None,
            }),
            ..tests_submission(strategy, "print(1)")
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingPublisher {
        pub(crate) records: StdMutex<Vec<OutcomeRecord>>,
    }

    #[async_trait]
    impl ResultPublisher for RecordingPublisher {
        async fn publish(&self, record: &OutcomeRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn factory(queue: Arc<InMemorySubmissionQueue>, admission: Admission) -> (QueueProcessingFactory, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let factory = QueueProcessingFactory::new(
            queue,
            publisher.clone(),
            Arc::new(Mutex::new(())),
            admission,
            Duration::from_millis(10),
        );
        (factory, publisher)
    }

    #[test]
    fn test_remote_eligibility() {
        let registry = StrategyRegistry::standard();
        assert!(is_remote_eligible(&registry, &tests_submission("python-code", "")));
        assert!(is_remote_eligible(&registry, &tests_submission("cpp-code", "")));
        assert!(!is_remote_eligible(&registry, &tests_submission("python-unit-tests", "")));
        assert!(!is_remote_eligible(&registry, &tests_submission("no-such-strategy", "")));
        assert!(!is_remote_eligible(&registry, &simple_submission("python-code")));
    }

    #[tokio::test]
    async fn test_ineligible_submission_stays_queued() {
        let registry = Arc::new(StrategyRegistry::standard());
        let local = tests_submission("python-unit-tests", "");
        let queue = Arc::new(InMemorySubmissionQueue::with([local.clone()]));

        let (remote_factory, _) = factory(queue.clone(), Admission::RemoteOnly(registry.clone()));
        let strategy = remote_factory.create();
        for _ in 0..3 {
            assert!(strategy.retrieve_submission().await.unwrap().is_none());
            assert_eq!(queue.ids(), vec![local.id]);
        }

        let (local_factory, _) = factory(queue.clone(), Admission::LocalOnly(registry));
        let taken = local_factory.create().retrieve_submission().await.unwrap().unwrap();
        assert_eq!(taken.id, local.id);
        assert!(queue.ids().is_empty());
    }

    #[tokio::test]
    async fn test_local_work_behind_remote_work_is_taken() {
        let registry = Arc::new(StrategyRegistry::standard());
        let remote_a = tests_submission("python-code", "");
        let local = tests_submission("python-unit-tests", "");
        let remote_b = tests_submission("cpp-code", "");
        let queue = Arc::new(InMemorySubmissionQueue::with([
            remote_a.clone(),
            local.clone(),
            remote_b.clone(),
        ]));

        // No remote processor is draining the queue
        let (local_factory, _) = factory(queue.clone(), Admission::LocalOnly(registry.clone()));
        let strategy = local_factory.create();
        let mut taken = Vec::new();
        for _ in 0..100 {
            if let Some(submission) = strategy.retrieve_submission().await.unwrap() {
                taken.push(submission.id);
            }
        }
        assert_eq!(taken, vec![local.id]);
        assert_eq!(queue.ids(), vec![remote_a.id, remote_b.id]);

        let (remote_factory, _) = factory(queue.clone(), Admission::RemoteOnly(registry));
        let strategy = remote_factory.create();
        assert_eq!(strategy.retrieve_submission().await.unwrap().unwrap().id, remote_a.id);
        assert_eq!(strategy.retrieve_submission().await.unwrap().unwrap().id, remote_b.id);
    }

    #[tokio::test]
    async fn test_outcomes_are_published() {
        let queue = Arc::new(InMemorySubmissionQueue::default());
        let (factory, publisher) = factory(queue, Admission::All);
        let strategy = factory.create();

        let submission = tests_submission("plaintext", "42");
        let result = ExecutionResult::Completed {
            results: vec![TestResult::failed(1, Verdict::WrongAnswer, "Line 1")],
        };
        strategy.process_tests_result(&submission, result).await.unwrap();

        let mut failed = submission.clone();
        failed.processing_comment = Some("Exception in executing the submission: boom".into());
        strategy.on_error(&failed).await.unwrap();

        let records = publisher.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, OutcomeKind::Tests);
        assert_eq!(records[1].kind, OutcomeKind::Error);
        assert_eq!(
            records[1].payload["processing_comment"],
            "Exception in executing the submission: boom"
        );
    }
}
