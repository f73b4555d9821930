//! Plain-text answers: the submission itself is the output

use agora_common::{ExecutionResult, JudgeResult, ProcessExecutionResult, TestResult, TestsInput};
use async_trait::async_trait;

use crate::checker::OutputChecker;
use crate::context::ExecutionContext;
use crate::pipeline::{
    OrderingPolicy, TestsExecution, check_and_get_test_result, evaluation_order,
};
use crate::settings::BaseOverhead;

#[derive(Debug, Default)]
pub struct CheckOnlyStrategy;

#[async_trait]
impl TestsExecution for CheckOnlyStrategy {
    async fn execute_tests(
        &self,
        context: &ExecutionContext<TestsInput>,
    ) -> JudgeResult<ExecutionResult<TestResult>> {
        let checker = OutputChecker::new(context.input.checker);
        let run = ProcessExecutionResult::success(context.code.clone(), 0);
        let tests = &context.input.tests;

        let mut results: Vec<(usize, TestResult)> = evaluation_order(tests, OrderingPolicy::TrialFirst)
            .into_iter()
            .map(|index| {
                let result = check_and_get_test_result(
                    &tests[index],
                    &run,
                    &checker,
                    &run.stdout,
                    BaseOverhead::default(),
                    context,
                );
                (index, result)
            })
            .collect();
        results.sort_by_key(|(index, _)| *index);

        Ok(ExecutionResult::Completed {
            results: results.into_iter().map(|(_, result)| result).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_common::{CheckerKind, TestCase, Verdict};

    use crate::context::tests::submission;

    #[tokio::test]
    async fn test_answer_checked_against_each_test() {
        let root = tempfile::tempdir().unwrap();
        let input = TestsInput {
            checker: CheckerKind::CaseInsensitive,
            task_skeleton: None,
            tests: vec![
                TestCase {
                    id: 1,
                    input: String::new(),
                    expected_output: "PARIS".into(),
                    is_trial_test: false,
                    order_by: 0,
                },
                TestCase {
                    id: 2,
                    input: String::new(),
                    expected_output: "London".into(),
                    is_trial_test: true,
                    order_by: 0,
                },
            ],
        };
        let ctx = ExecutionContext::new(&submission("Paris\n"), input, root.path()).unwrap();

        let result = CheckOnlyStrategy.execute_tests(&ctx).await.unwrap();
        let verdicts: Vec<(i64, Verdict)> = result.results().iter().map(|r| (r.id, r.verdict)).collect();
        assert_eq!(verdicts, vec![(1, Verdict::Accepted), (2, Verdict::WrongAnswer)]);
    }
}
