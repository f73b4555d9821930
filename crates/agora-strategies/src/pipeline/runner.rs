//! The policy-driven strategy used by most variants

use std::path::PathBuf;
use std::sync::Arc;

use agora_common::{
    ExecutionResult, ExecutionStrategyType, JudgeResult, OutputResult, ProcessOutcome, SimpleInput,
    TestCase, TestResult, TestsInput,
};
use async_trait::async_trait;

use super::policy::{CompileStep, InputShaper, Launch, OrderingPolicy, OutputParser};
use super::{
    ResultSlots, SimpleExecution, TestsExecution, check_and_get_test_result, evaluation_order,
    output_result,
};
use crate::checker::OutputChecker;
use crate::context::ExecutionContext;
use crate::process::{ProcessExecutor, ProcessRequest};
use crate::project;
use crate::settings::BaseOverhead;
use crate::unittest::{self, PassCountTracker, UnitTestMessage};

const TESTS_PACKAGE: &str = "tests";
const TEST_MODULE: &str = "tests/test_submission.py";
const PROJECT_PACKAGE: &str = "project";

/// A strategy assembled from policies
pub struct PipelineStrategy {
    strategy_type: ExecutionStrategyType,
    executor: Arc<dyn ProcessExecutor>,
    launch: Launch,
    compile: Option<CompileStep>,
    shaper: InputShaper,
    parser: OutputParser,
    ordering: OrderingPolicy,
    overhead: BaseOverhead,
    compile_limits: (u64, u64),
}

impl PipelineStrategy {
    pub fn new(strategy_type: ExecutionStrategyType, executor: Arc<dyn ProcessExecutor>, launch: Launch) -> Self {
        Self {
            strategy_type,
            executor,
            launch,
            compile: None,
            shaper: InputShaper::Stdin,
            parser: OutputParser::Stdout,
            ordering: OrderingPolicy::TrialFirst,
            overhead: BaseOverhead::default(),
            compile_limits: (10_000, 512 * 1024 * 1024),
        }
    }

    pub fn compile(mut self, step: CompileStep, time_limit_ms: u64, memory_limit_bytes: u64) -> Self {
        self.compile = Some(step);
        self.compile_limits = (time_limit_ms, memory_limit_bytes);
        self
    }

    pub fn shaper(mut self, shaper: InputShaper) -> Self {
        self.shaper = shaper;
        self
    }

    pub fn parser(mut self, parser: OutputParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn overhead(mut self, overhead: BaseOverhead) -> Self {
        self.overhead = overhead;
        self
    }

    /// Save the code and compile it if needed. `Err` carries the compiler output.
    async fn prepare<I>(&self, context: &ExecutionContext<I>) -> JudgeResult<Result<(), String>> {
        let Some(step) = &self.compile else {
            if let (Some(file), true) = (self.launch.code_file(), self.shaper.uses_stdin()) {
                context.write_file(file, &context.code).await?;
            }
            return Ok(Ok(()));
        };

        context.write_file(&step.source_file, &context.code).await?;
        let (time_limit_ms, memory_limit_bytes) = self.compile_limits;
        let run = self
            .executor
            .execute(step.request(context.working_dir(), time_limit_ms, memory_limit_bytes))
            .await?;

        if run.outcome == ProcessOutcome::Success {
            Ok(Ok(()))
        } else {
            tracing::debug!(
                submission_id = %context.submission_id,
                strategy = %self.strategy_type,
                "Compilation failed"
            );
            Ok(Err(context.mask_working_dir(run.error_output())))
        }
    }

    fn request<I>(&self, context: &ExecutionContext<I>, stdin: &str) -> ProcessRequest {
        let dir = context.working_dir();
        let request = match &self.launch {
            Launch::Script {
                interpreter,
                args,
                file_name,
            } => ProcessRequest::new(interpreter, context.time_limit_ms, context.memory_limit_bytes)
                .args(args.iter().cloned())
                .args([dir.join(file_name).to_string_lossy().into_owned()]),
            Launch::Compiled => {
                let binary = self
                    .compile
                    .as_ref()
                    .map(|step| dir.join(&step.binary_file))
                    .unwrap_or_else(|| PathBuf::from("/bin/false"));
                ProcessRequest::new(binary, context.time_limit_ms, context.memory_limit_bytes)
            }
            Launch::InWorkingDir { interpreter, args } => {
                ProcessRequest::new(interpreter, context.time_limit_ms, context.memory_limit_bytes)
                    .args(args.iter().cloned())
            }
        };
        request.stdin(stdin).working_dir(dir)
    }

    /// Materialise files shared by every test.
    async fn setup_tests(&self, context: &ExecutionContext<TestsInput>) -> JudgeResult<TestsSetup> {
        match self.shaper {
            InputShaper::Stdin | InputShaper::AppendToCode => Ok(TestsSetup::default()),
            InputShaper::PrependToCode => {
                let class_name =
                    unittest::class_name_from_skeleton(context.input.task_skeleton.as_deref())?;
                Ok(TestsSetup {
                    code: Some(unittest::strip_class_imports(&context.code, &class_name)),
                    ..TestsSetup::default()
                })
            }
            InputShaper::TestModule => {
                context.unpack_archive().await?;
                context.create_package(TESTS_PACKAGE).await?;
                Ok(TestsSetup::default())
            }
            InputShaper::ProjectFiles => {
                let expected = project::expected_files_count(context.input.task_skeleton.as_deref())?;
                context.unpack_archive().await?;
                context.create_package(PROJECT_PACKAGE).await?;
                Ok(TestsSetup {
                    expected_files: Some(expected),
                    ..TestsSetup::default()
                })
            }
        }
    }

    /// Write per-test files and return the stdin for the run.
    async fn shape_test(
        &self,
        context: &ExecutionContext<TestsInput>,
        setup: &TestsSetup,
        test: &TestCase,
    ) -> JudgeResult<String> {
        let code_file = self.launch.code_file().unwrap_or("solution.py");
        match self.shaper {
            InputShaper::Stdin => return Ok(test.input.clone()),
            InputShaper::AppendToCode => {
                context
                    .write_file(code_file, &format!("{}\n{}", context.code, test.input))
                    .await?;
            }
            InputShaper::PrependToCode => {
                let code = setup.code.as_deref().unwrap_or(&context.code);
                context
                    .write_file(code_file, &format!("{}\n{}", test.input, code))
                    .await?;
            }
            InputShaper::TestModule => {
                context.write_file(TEST_MODULE, &test.input).await?;
            }
            InputShaper::ProjectFiles => {
                let files = project::project_files(test, setup.expected_files.unwrap_or_default())?;
                for file in files {
                    context
                        .write_file(format!("{PROJECT_PACKAGE}/{}", file.file_name), &file.content)
                        .await?;
                }
            }
        }
        Ok(String::new())
    }
}

#[derive(Debug, Default)]
struct TestsSetup {
    /// Learner code after preprocessing
    code: Option<String>,
    expected_files: Option<usize>,
}

#[async_trait]
impl TestsExecution for PipelineStrategy {
    async fn execute_tests(
        &self,
        context: &ExecutionContext<TestsInput>,
    ) -> JudgeResult<ExecutionResult<TestResult>> {
        if let Err(compiler_comment) = self.prepare(context).await? {
            return Ok(ExecutionResult::CompileError { compiler_comment });
        }

        let setup = self.setup_tests(context).await?;
        let checker = OutputChecker::new(context.input.checker);
        let tests = &context.input.tests;
        let mut slots = ResultSlots::new(tests.len());
        let mut tracker = PassCountTracker::new();

        for index in evaluation_order(tests, self.ordering) {
            let test = &tests[index];
            let stdin = self.shape_test(context, &setup, test).await?;
            let mut run = self.executor.execute(self.request(context, &stdin)).await?;

            let received = match self.parser {
                OutputParser::Stdout => run.stdout.clone(),
                OutputParser::UnitTestCase => {
                    unittest::promote_stderr_report(&mut run);
                    UnitTestMessage::from_output(&run.stdout).apply(&mut run)
                }
                OutputParser::UnitTestDiff => {
                    unittest::promote_stderr_report(&mut run);
                    if run.outcome == ProcessOutcome::Success {
                        tracker.observe(&run.stdout)
                    } else {
                        tracker.skip();
                        String::new()
                    }
                }
            };

            let result = check_and_get_test_result(test, &run, &checker, &received, self.overhead, context);
            tracing::trace!(
                submission_id = %context.submission_id,
                test_id = test.id,
                verdict = result.verdict.code(),
                "Test judged"
            );
            slots.put(index, result);
        }

        Ok(ExecutionResult::Completed {
            results: slots.into_results(),
        })
    }
}

#[async_trait]
impl SimpleExecution for PipelineStrategy {
    async fn execute_simple(
        &self,
        context: &ExecutionContext<SimpleInput>,
    ) -> JudgeResult<ExecutionResult<OutputResult>> {
        if let Err(compiler_comment) = self.prepare(context).await? {
            return Ok(ExecutionResult::CompileError { compiler_comment });
        }

        let run = self
            .executor
            .execute(self.request(context, &context.input.input))
            .await?;
        let result = output_result(
            &run,
            &OutputChecker::default(),
            context.input.expected_output.as_deref(),
            self.overhead,
            context,
        );

        Ok(ExecutionResult::Completed {
            results: vec![result],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_common::{CheckerKind, ProcessExecutionResult, SubmissionInput, Verdict};

    use crate::context::tests::{submission, zip_of};
    use crate::pipeline::tests::test_case;
    use crate::process::MockProcessExecutor;

    fn tests_context(
        tests: Vec<TestCase>,
        skeleton: Option<&str>,
        root: &std::path::Path,
    ) -> ExecutionContext<TestsInput> {
        let input = TestsInput {
            checker: CheckerKind::Trim,
            task_skeleton: skeleton.map(str::to_string),
            tests,
        };
        let mut sub = submission("a = int(input())\nb = int(input())\nprint(a + b)\n");
        sub.input = SubmissionInput::Tests(input.clone());
        ExecutionContext::new(&sub, input, root).unwrap()
    }

    fn io_test(id: i64, input: &str, expected: &str) -> TestCase {
        TestCase {
            input: input.into(),
            expected_output: expected.into(),
            ..test_case(id, false, id as i32)
        }
    }

    /// Adds the integers found on stdin, like the learner program would
    fn summing_executor() -> MockProcessExecutor {
        let mut executor = MockProcessExecutor::new();
        executor.expect_execute().returning(|request| {
            let sum: i64 = request.stdin.lines().filter_map(|l| l.trim().parse::<i64>().ok()).sum();
            Ok(ProcessExecutionResult::success(format!("{sum}\n"), 12))
        });
        executor
    }

    #[tokio::test]
    async fn test_python_code_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let ctx = tests_context(
            vec![io_test(1, "2\n3", "5"), io_test(2, "10\n-1", "9")],
            None,
            root.path(),
        );
        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonExecuteAndCheck,
            Arc::new(summing_executor()),
            Launch::python_script("/usr/bin/python3"),
        );

        let result = strategy.execute_tests(&ctx).await.unwrap();
        let results = result.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.verdict == Verdict::Accepted));
        assert_eq!(results[0].id, 1);

        let saved = std::fs::read_to_string(ctx.working_dir().join("solution.py")).unwrap();
        assert_eq!(saved, ctx.code);
    }

    #[tokio::test]
    async fn test_compile_failure_short_circuits() {
        let root = tempfile::tempdir().unwrap();
        let ctx = tests_context(
            vec![io_test(1, "1", "1"), io_test(2, "2", "2"), io_test(3, "3", "3")],
            None,
            root.path(),
        );

        let mut executor = MockProcessExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .withf(|request| request.program.ends_with("g++") && !request.restricted)
            .returning(|_| {
                Ok(ProcessExecutionResult::failure(
                    ProcessOutcome::CompileError,
                    "main.cpp:1:1: error: expected unqualified-id",
                    40,
                ))
            });

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::CPlusPlusCompileExecuteAndCheckExecutionStrategy,
            Arc::new(executor),
            Launch::Compiled,
        )
        .compile(CompileStep::cpp("/usr/bin/g++"), 10_000, 1 << 29);

        let result = strategy.execute_tests(&ctx).await.unwrap();
        assert!(!result.is_compiled_successfully());
        assert!(result.results().is_empty());
        let ExecutionResult::CompileError { compiler_comment } = result else {
            panic!("expected compile error");
        };
        assert!(compiler_comment.contains("expected unqualified-id"));
    }

    #[tokio::test]
    async fn test_results_keep_declaration_order() {
        let root = tempfile::tempdir().unwrap();
        let tests = vec![
            TestCase { input: "1".into(), expected_output: "1".into(), ..test_case(1, true, 2) },
            TestCase { input: "2".into(), expected_output: "2".into(), ..test_case(2, true, 1) },
            TestCase { input: "3".into(), expected_output: "3".into(), ..test_case(3, false, 1) },
            TestCase { input: "4".into(), expected_output: "4".into(), ..test_case(4, false, 3) },
        ];
        let ctx = tests_context(tests, None, root.path());

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let mut executor = MockProcessExecutor::new();
        executor.expect_execute().returning(move |request| {
            recorder.lock().unwrap().push(request.stdin.clone());
            Ok(ProcessExecutionResult::success(request.stdin, 1))
        });

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonExecuteAndCheck,
            Arc::new(executor),
            Launch::python_script("python3"),
        );
        let result = strategy.execute_tests(&ctx).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["2", "1", "3", "4"]);
        let ids: Vec<i64> = result.results().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_unit_tests_diffing_across_runs() {
        let root = tempfile::tempdir().unwrap();
        let tests = vec![
            TestCase { expected_output: "Test Passed!".into(), ..test_case(10, false, 2) },
            TestCase { expected_output: "Test Passed!".into(), ..test_case(11, true, 1) },
        ];
        let ctx = tests_context(tests, Some("# class_name Calculator"), root.path());

        let reports = std::sync::Mutex::new(vec![
            "....F\n----\nRan 5 tests in 0.001s\n\nFAILED (failures=1)\n",
            ".....\n----\nRan 5 tests in 0.001s\n\nOK\n",
        ]);
        let mut executor = MockProcessExecutor::new();
        executor.expect_execute().times(2).returning(move |_| {
            let report = reports.lock().unwrap().pop().unwrap_or_default();
            // unittest reports on stderr with a failing exit code
            Ok(ProcessExecutionResult::failure(ProcessOutcome::RuntimeError, report, 3))
        });

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonUnitTests,
            Arc::new(executor),
            Launch::python_script("python3"),
        )
        .shaper(InputShaper::PrependToCode)
        .parser(OutputParser::UnitTestDiff);

        let result = strategy.execute_tests(&ctx).await.unwrap();
        let results = result.results();
        // Trial test 11 is the baseline, test 10 drops one passing case
        assert_eq!(results[0].id, 10);
        assert_eq!(results[0].verdict, Verdict::Accepted);
        assert_eq!(results[1].id, 11);
        assert_eq!(results[1].verdict, Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_missing_class_name_is_authoring_error() {
        let root = tempfile::tempdir().unwrap();
        let ctx = tests_context(vec![io_test(1, "", "")], Some("no metadata"), root.path());
        let mut executor = MockProcessExecutor::new();
        executor.expect_execute().never();

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonUnitTests,
            Arc::new(executor),
            Launch::python_script("python3"),
        )
        .shaper(InputShaper::PrependToCode)
        .parser(OutputParser::UnitTestDiff);

        let err = strategy.execute_tests(&ctx).await.unwrap_err();
        assert!(err.is_authoring());
    }

    #[tokio::test]
    async fn test_project_files_written_per_test() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = tests_context(
            vec![TestCase {
                input: "class Shape:\n    pass\nclass CircleArea(Shape):\n    pass\n".into(),
                expected_output: "Test Passed!".into(),
                ..test_case(1, false, 0)
            }],
            Some("# project_files_count 2"),
            root.path(),
        );
        ctx.file_content = Some(zip_of(&[("tests/test_shapes.py", "import unittest")]));

        let mut executor = MockProcessExecutor::new();
        executor
            .expect_execute()
            .withf(|request| request.args.ends_with(&["unittest".to_string(), "discover".to_string()]))
            .returning(|_| Ok(ProcessExecutionResult::success("..\n----\nRan 2 tests\n\nOK\n", 3)));

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonProjectUnitTests,
            Arc::new(executor),
            Launch::python_discover("python3"),
        )
        .shaper(InputShaper::ProjectFiles)
        .parser(OutputParser::UnitTestDiff);

        let result = strategy.execute_tests(&ctx).await.unwrap();
        assert_eq!(result.results()[0].verdict, Verdict::Accepted);

        let dir = ctx.working_dir();
        assert!(dir.join("project/__init__.py").exists());
        assert!(dir.join("project/shape.py").exists());
        assert!(dir.join("project/circle_area.py").exists());
        assert!(dir.join("tests/test_shapes.py").exists());
    }

    const ERROR_REPORT: &str = "E\n\
======================================================================\n\
ERROR: test_area (tests.test_submission.AreaTests)\n\
----------------------------------------------------------------------\n\
Traceback (most recent call last):\n\
  File \"tests/test_submission.py\", line 5, in test_area\n\
    area(2)\n\
NameError: name 'area' is not defined\n\
\n\
----------------------------------------------------------------------\n\
Ran 1 test in 0.000s\n\
\n\
FAILED (errors=1)\n";

    const FAIL_REPORT: &str = "F\n\
======================================================================\n\
FAIL: test_sum (__main__.SumTests)\n\
----------------------------------------------------------------------\n\
Traceback (most recent call last):\n\
  File \"solution.py\", line 9, in test_sum\n\
    self.assertEqual(add(1, 2), 4)\n\
AssertionError: 3 != 4\n\
\n\
----------------------------------------------------------------------\n\
Ran 1 test in 0.001s\n\
\n\
FAILED (failures=1)\n";

    /// Records `file` as the candidate sees it on each run and answers with `report(content)` on stderr
    fn file_reading_executor(
        file: &'static str,
        seen: Arc<std::sync::Mutex<Vec<String>>>,
        report: fn(&str) -> String,
    ) -> MockProcessExecutor {
        let mut executor = MockProcessExecutor::new();
        executor.expect_execute().returning(move |request| {
            let dir = request.working_dir.clone().unwrap();
            let content = std::fs::read_to_string(dir.join(file)).unwrap();
            let stderr = report(&content);
            seen.lock().unwrap().push(content);
            // unittest reports on stderr and exits non-zero on failures
            Ok(ProcessExecutionResult::failure(ProcessOutcome::RuntimeError, stderr, 4))
        });
        executor
    }

    #[tokio::test]
    async fn test_test_module_rewritten_per_test() {
        let root = tempfile::tempdir().unwrap();
        let broken = "import unittest\nclass AreaTests(unittest.TestCase):\n    def test_area(self):\n        area(2)\n";
        let passing = "import unittest\nclass AreaTests(unittest.TestCase):\n    def test_area(self):\n        pass\n";
        let mut ctx = tests_context(
            vec![io_test(1, broken, "Test Passed!"), io_test(2, passing, "Test Passed!")],
            None,
            root.path(),
        );
        ctx.file_content = Some(zip_of(&[("shapes/area.py", "def square(a):\n    return a * a\n")]));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let executor = file_reading_executor(TEST_MODULE, seen.clone(), |content| {
            if content.contains("area(2)") {
                ERROR_REPORT.to_string()
            } else {
                ".\n----------------------------------------------------------------------\nRan 1 test in 0.000s\n\nOK\n"
                    .to_string()
            }
        });

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonProjectTests,
            Arc::new(executor),
            Launch::python_discover("python3"),
        )
        .shaper(InputShaper::TestModule)
        .parser(OutputParser::UnitTestCase);

        let result = strategy.execute_tests(&ctx).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![broken.to_string(), passing.to_string()]);

        let results = result.results();
        assert_eq!(results[0].verdict, Verdict::RuntimeError);
        assert_eq!(
            results[0].message.as_deref(),
            Some("NameError: name 'area' is not defined")
        );
        assert_eq!(results[1].verdict, Verdict::Accepted);

        let dir = ctx.working_dir();
        assert!(dir.join("tests/__init__.py").exists());
        assert!(dir.join("shapes/area.py").exists());
        assert_eq!(std::fs::read_to_string(dir.join(TEST_MODULE)).unwrap(), passing);
    }

    #[tokio::test]
    async fn test_unit_tests_appended_to_code() {
        let root = tempfile::tempdir().unwrap();
        let unit_tests = "class SumTests(unittest.TestCase):\n    def test_sum(self):\n        self.assertEqual(add(1, 2), 4)\n";
        let ctx = tests_context(vec![io_test(1, unit_tests, "Test Passed!")], None, root.path());

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let executor = file_reading_executor("solution.py", seen.clone(), |_| FAIL_REPORT.to_string());

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonCodeExecuteAgainstUnitTests,
            Arc::new(executor),
            Launch::python_script("python3"),
        )
        .shaper(InputShaper::AppendToCode)
        .parser(OutputParser::UnitTestCase);

        let result = strategy.execute_tests(&ctx).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![format!("{}\n{}", ctx.code, unit_tests)]);

        let test = &result.results()[0];
        assert_eq!(test.verdict, Verdict::WrongAnswer);
        assert!(test.message.as_deref().unwrap().contains("AssertionError: 3 != 4"));
    }

    #[tokio::test]
    async fn test_simple_execution() {
        let root = tempfile::tempdir().unwrap();
        let sub = submission("print(sum(map(int, input().split())))");
        let input = SimpleInput {
            input: "4\n5".into(),
            expected_output: Some("9".into()),
        };
        let ctx = ExecutionContext::new(&sub, input, root.path()).unwrap();

        let strategy = PipelineStrategy::new(
            ExecutionStrategyType::PythonExecuteAndCheck,
            Arc::new(summing_executor()),
            Launch::python_script("python3"),
        );
        let result = strategy.execute_simple(&ctx).await.unwrap();
        let output = &result.results()[0];
        assert_eq!(output.verdict, Verdict::Accepted);
        assert_eq!(output.output, "9\n");
    }
}
