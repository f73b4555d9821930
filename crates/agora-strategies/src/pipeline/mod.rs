//! Shared testing pipeline.
//!
//! Strategies expose the execution kinds they support through
//! [`TestsExecution`] and [`SimpleExecution`]; an [`ExecutionStrategy`] carries
//! whichever of the two a variant implements.

mod policy;
mod runner;

use std::sync::Arc;

use agora_common::{
    ExecutionKind, ExecutionResult, ExecutionStrategyType, JudgeError, JudgeResult, OutputResult,
    ProcessExecutionResult, ProcessOutcome, SimpleInput, TestCase, TestResult, TestsInput, Verdict,
};
use async_trait::async_trait;

use crate::checker::Checker;
use crate::context::ExecutionContext;
use crate::settings::BaseOverhead;

pub use policy::{CompileStep, InputShaper, Launch, OrderingPolicy, OutputParser};
pub use runner::PipelineStrategy;

/// Strategies able to run a submission against a list of tests
#[async_trait]
pub trait TestsExecution: Send + Sync {
    async fn execute_tests(
        &self,
        context: &ExecutionContext<TestsInput>,
    ) -> JudgeResult<ExecutionResult<TestResult>>;
}

/// Strategies able to run a submission once against a single input
#[async_trait]
pub trait SimpleExecution: Send + Sync {
    async fn execute_simple(
        &self,
        context: &ExecutionContext<SimpleInput>,
    ) -> JudgeResult<ExecutionResult<OutputResult>>;
}

/// A resolved strategy and the execution kinds it supports
#[derive(Clone)]
pub struct ExecutionStrategy {
    pub strategy_type: ExecutionStrategyType,
    tests: Option<Arc<dyn TestsExecution>>,
    simple: Option<Arc<dyn SimpleExecution>>,
}

impl std::fmt::Debug for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStrategy")
            .field("strategy_type", &self.strategy_type)
            .field("tests", &self.tests.is_some())
            .field("simple", &self.simple.is_some())
            .finish()
    }
}

impl ExecutionStrategy {
    pub fn tests_only(strategy_type: ExecutionStrategyType, tests: Arc<dyn TestsExecution>) -> Self {
        Self {
            strategy_type,
            tests: Some(tests),
            simple: None,
        }
    }

    /// Strategy implementing both execution kinds
    pub fn both<S>(strategy_type: ExecutionStrategyType, strategy: Arc<S>) -> Self
    where
        S: TestsExecution + SimpleExecution + 'static,
    {
        Self {
            strategy_type,
            tests: Some(strategy.clone()),
            simple: Some(strategy),
        }
    }

    pub fn supports(&self, kind: ExecutionKind) -> bool {
        match kind {
            ExecutionKind::TestsExecution => self.tests.is_some(),
            ExecutionKind::SimpleExecution => self.simple.is_some(),
        }
    }

    pub fn tests(&self) -> JudgeResult<&dyn TestsExecution> {
        self.tests
            .as_deref()
            .ok_or_else(|| self.unsupported(ExecutionKind::TestsExecution))
    }

    pub fn simple(&self) -> JudgeResult<&dyn SimpleExecution> {
        self.simple
            .as_deref()
            .ok_or_else(|| self.unsupported(ExecutionKind::SimpleExecution))
    }

    fn unsupported(&self, kind: ExecutionKind) -> JudgeError {
        JudgeError::UnsupportedExecutionKind {
            strategy: self.strategy_type.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// Indices of `tests` in evaluation order.
pub fn evaluation_order(tests: &[TestCase], policy: OrderingPolicy) -> Vec<usize> {
    let mut order: Vec<usize> = (0..tests.len()).collect();
    if policy == OrderingPolicy::TrialFirst {
        // Stable: equal keys keep declaration order
        order.sort_by_key(|&i| (!tests[i].is_trial_test, tests[i].order_by));
    }
    order
}

/// Turn a classified run into a test result.
///
/// `received` is what the checker compares with the expected output; for plain
/// programs it is stdout, unit-test variants pass a derived message.
pub fn check_and_get_test_result<I>(
    test: &TestCase,
    run: &ProcessExecutionResult,
    checker: &dyn Checker,
    received: &str,
    overhead: BaseOverhead,
    context: &ExecutionContext<I>,
) -> TestResult {
    let mut result = TestResult {
        id: test.id,
        verdict: Verdict::Accepted,
        message: None,
        checker_details: None,
        time_used_ms: run.time_used_ms.saturating_sub(overhead.time_ms),
        memory_used_bytes: run.memory_used_bytes.saturating_sub(overhead.memory_bytes),
        is_trial_test: test.is_trial_test,
    };

    match run.outcome {
        ProcessOutcome::RuntimeError | ProcessOutcome::CompileError => {
            result.verdict = Verdict::RuntimeError;
            result.message = Some(context.mask_working_dir(run.error_output()));
        }
        ProcessOutcome::TimeLimitExceeded => {
            result.verdict = Verdict::TimeLimitExceeded;
            result.message = Some("Time limit exceeded".to_string());
        }
        ProcessOutcome::MemoryLimitExceeded => {
            result.verdict = Verdict::MemoryLimitExceeded;
            result.message = Some("Memory limit exceeded".to_string());
        }
        ProcessOutcome::Success => {
            let check = checker.check(&test.expected_output, received, test);
            if !check.is_correct {
                result.verdict = Verdict::WrongAnswer;
                result.message = check.details.clone();
            }
            result.checker_details = check.details;
        }
    }

    result
}

/// Turn a single run into an output result.
pub fn output_result<I>(
    run: &ProcessExecutionResult,
    checker: &dyn Checker,
    expected: Option<&str>,
    overhead: BaseOverhead,
    context: &ExecutionContext<I>,
) -> OutputResult {
    let (verdict, message) = match run.outcome {
        ProcessOutcome::RuntimeError | ProcessOutcome::CompileError => (
            Verdict::RuntimeError,
            Some(context.mask_working_dir(run.error_output())),
        ),
        ProcessOutcome::TimeLimitExceeded => (Verdict::TimeLimitExceeded, None),
        ProcessOutcome::MemoryLimitExceeded => (Verdict::MemoryLimitExceeded, None),
        ProcessOutcome::Success => match expected {
            None => (Verdict::Accepted, None),
            Some(expected) => {
                let expected_case = TestCase {
                    id: 0,
                    input: String::new(),
                    expected_output: expected.to_string(),
                    is_trial_test: false,
                    order_by: 0,
                };
                let check = checker.check(expected, &run.stdout, &expected_case);
                let verdict = if check.is_correct {
                    Verdict::Accepted
                } else {
                    Verdict::WrongAnswer
                };
                (verdict, check.details)
            }
        },
    };

    OutputResult {
        verdict,
        output: run.stdout.clone(),
        message,
        time_used_ms: run.time_used_ms.saturating_sub(overhead.time_ms),
        memory_used_bytes: run.memory_used_bytes.saturating_sub(overhead.memory_bytes),
    }
}

/// Collects results by declaration index and returns them in declaration order.
pub(crate) struct ResultSlots {
    slots: Vec<Option<TestResult>>,
}

impl ResultSlots {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub(crate) fn put(&mut self, index: usize, result: TestResult) {
        self.slots[index] = Some(result);
    }

    pub(crate) fn into_results(self) -> Vec<TestResult> {
        self.slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checker::OutputChecker;
    use crate::context::tests::submission;

    pub(crate) fn test_case(id: i64, trial: bool, order_by: i32) -> TestCase {
        TestCase {
            id,
            input: String::new(),
            expected_output: String::new(),
            is_trial_test: trial,
            order_by,
        }
    }

    #[test]
    fn test_trial_first_ordering() {
        let tests = vec![
            test_case(1, true, 2),  // T1
            test_case(2, true, 1),  // T2
            test_case(3, false, 1), // N1
            test_case(4, false, 3), // N2
        ];
        let ids: Vec<i64> = evaluation_order(&tests, OrderingPolicy::TrialFirst)
            .into_iter()
            .map(|i| tests[i].id)
            .collect();
        assert_eq!(ids, vec![2, 1, 3, 4]);

        assert_eq!(evaluation_order(&tests, OrderingPolicy::Declaration), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_judging_a_run() {
        let root = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(&submission(""), (), root.path()).unwrap();
        let checker = OutputChecker::default();
        let mut test = test_case(5, true, 0);
        test.expected_output = "5".into();
        let overhead = BaseOverhead {
            time_ms: 30,
            memory_bytes: 0,
        };

        let run = ProcessExecutionResult::success("5\n", 20);
        let result = check_and_get_test_result(&test, &run, &checker, &run.stdout, overhead, &ctx);
        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.time_used_ms, 0);
        assert!(result.is_trial_test);

        let run = ProcessExecutionResult::success("6\n", 20);
        let result = check_and_get_test_result(&test, &run, &checker, &run.stdout, overhead, &ctx);
        assert_eq!(result.verdict, Verdict::WrongAnswer);

        let crash = format!("{}/solution.py: boom", ctx.working_dir().display());
        let run = ProcessExecutionResult::failure(ProcessOutcome::RuntimeError, crash, 1);
        let result = check_and_get_test_result(&test, &run, &checker, "", overhead, &ctx);
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(result.message.as_deref(), Some(".../solution.py: boom"));
    }

    #[test]
    fn test_unsupported_kind() {
        struct Nothing;
        #[async_trait]
        impl TestsExecution for Nothing {
            async fn execute_tests(
                &self,
                _context: &ExecutionContext<TestsInput>,
            ) -> JudgeResult<ExecutionResult<TestResult>> {
                Ok(ExecutionResult::Completed { results: vec![] })
            }
        }

        let strategy = ExecutionStrategy::tests_only(ExecutionStrategyType::CheckOnly, Arc::new(Nothing));
        assert!(strategy.supports(ExecutionKind::TestsExecution));
        assert!(strategy.tests().is_ok());
        let err = strategy.simple().err().unwrap();
        assert_eq!(err.error_code(), "UNSUPPORTED_EXECUTION_KIND");
    }
}
