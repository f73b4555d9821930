//! Builds execution strategies from resolved strategy types

use std::sync::Arc;

use agora_common::{ExecutionStrategyType, JudgeError, JudgeResult};

use crate::check_only::CheckOnlyStrategy;
use crate::jsdom::JsDomStrategy;
use crate::pipeline::{
    CompileStep, ExecutionStrategy, InputShaper, Launch, OutputParser, PipelineStrategy,
};
use crate::process::ProcessExecutor;
use crate::settings::StrategySettings;
use crate::sql::{SqlBackend, SqlMode, SqlStrategy};

use ExecutionStrategyType as T;

/// Creates strategies bound to a process back end and, optionally, a database
#[derive(Clone)]
pub struct StrategyFactory {
    settings: Arc<StrategySettings>,
    executor: Arc<dyn ProcessExecutor>,
    sql: Option<Arc<dyn SqlBackend>>,
}

impl StrategyFactory {
    pub fn new(settings: StrategySettings, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            settings: Arc::new(settings),
            executor,
            sql: None,
        }
    }

    /// Enable database strategies
    pub fn with_sql(mut self, backend: Arc<dyn SqlBackend>) -> Self {
        self.sql = Some(backend);
        self
    }

    pub fn create(&self, strategy_type: ExecutionStrategyType) -> JudgeResult<ExecutionStrategy> {
        let s = &self.settings;
        let python = |launch: Launch| {
            PipelineStrategy::new(strategy_type, self.executor.clone(), launch).overhead(s.python_overhead)
        };

        let strategy = match strategy_type {
            T::PythonExecuteAndCheck => {
                ExecutionStrategy::both(strategy_type, Arc::new(python(Launch::python_script(&s.python_path))))
            }
            T::PythonCodeExecuteAgainstUnitTests => ExecutionStrategy::tests_only(
                strategy_type,
                Arc::new(
                    python(Launch::python_script(&s.python_path))
                        .shaper(InputShaper::AppendToCode)
                        .parser(OutputParser::UnitTestCase),
                ),
            ),
            T::PythonUnitTests => ExecutionStrategy::tests_only(
                strategy_type,
                Arc::new(
                    python(Launch::python_script(&s.python_path))
                        .shaper(InputShaper::PrependToCode)
                        .parser(OutputParser::UnitTestDiff),
                ),
            ),
            T::PythonProjectTests => ExecutionStrategy::tests_only(
                strategy_type,
                Arc::new(
                    python(Launch::python_discover(&s.python_path))
                        .shaper(InputShaper::TestModule)
                        .parser(OutputParser::UnitTestCase),
                ),
            ),
            T::PythonProjectUnitTests => ExecutionStrategy::tests_only(
                strategy_type,
                Arc::new(
                    python(Launch::python_discover(&s.python_path))
                        .shaper(InputShaper::ProjectFiles)
                        .parser(OutputParser::UnitTestDiff),
                ),
            ),
            T::NodeJsPreprocessExecuteAndCheck => ExecutionStrategy::both(
                strategy_type,
                Arc::new(
                    PipelineStrategy::new(strategy_type, self.executor.clone(), Launch::node_script(&s.nodejs_path))
                        .overhead(s.nodejs_overhead),
                ),
            ),
            T::NodeJsPreprocessExecuteAndRunJsDomUnitTests => ExecutionStrategy::tests_only(
                strategy_type,
                Arc::new(JsDomStrategy::new(
                    self.executor.clone(),
                    &s.nodejs_path,
                    s.js_modules.clone(),
                    s.nodejs_overhead,
                )),
            ),
            T::CPlusPlusCompileExecuteAndCheckExecutionStrategy => ExecutionStrategy::both(
                strategy_type,
                Arc::new(
                    PipelineStrategy::new(strategy_type, self.executor.clone(), Launch::Compiled)
                        .compile(
                            CompileStep::cpp(&s.cpp_compiler_path),
                            s.compile_time_limit_ms,
                            s.compile_memory_limit_bytes,
                        )
                        .overhead(s.cpp_overhead),
                ),
            ),
            T::CheckOnly => ExecutionStrategy::tests_only(strategy_type, Arc::new(CheckOnlyStrategy)),
            T::PostgresPrepareDatabaseAndRunQueries => {
                self.sql_strategy(strategy_type, SqlMode::PrepareDatabaseAndRunQueries)?
            }
            T::PostgresRunQueriesAndCheckDatabase => {
                self.sql_strategy(strategy_type, SqlMode::RunQueriesAndCheckDatabase)?
            }
            T::PostgresRunSkeletonRunQueriesAndCheckDatabase => {
                self.sql_strategy(strategy_type, SqlMode::RunSkeletonRunQueriesAndCheckDatabase)?
            }
            other => return Err(JudgeError::StrategyNotFound(other.to_string())),
        };

        Ok(strategy)
    }

    fn sql_strategy(&self, strategy_type: ExecutionStrategyType, mode: SqlMode) -> JudgeResult<ExecutionStrategy> {
        let backend = self
            .sql
            .clone()
            .ok_or_else(|| JudgeError::Database("Database strategies are not configured on this worker".into()))?;
        Ok(ExecutionStrategy::tests_only(
            strategy_type,
            Arc::new(SqlStrategy::new(backend, mode, self.settings.sql_statement_timeout_ms)),
        ))
    }
}
