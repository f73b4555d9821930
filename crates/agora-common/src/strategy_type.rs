//! Closed set of execution strategy types

use serde::{Deserialize, Serialize};

/// Internal strategy type. Discriminants are stable and shared with the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum ExecutionStrategyType {
    NotFound = 0,
    CompileExecuteAndCheck = 1,
    NodeJsPreprocessExecuteAndCheck = 2,
    JavaPreprocessCompileExecuteAndCheck = 4,
    PhpCliExecuteAndCheck = 6,
    CheckOnly = 7,
    PythonExecuteAndCheck = 9,
    NodeJsPreprocessExecuteAndRunJsDomUnitTests = 12,
    CPlusPlusCompileExecuteAndCheckExecutionStrategy = 29,
    DotNetCoreCompileExecuteAndCheck = 37,
    PythonUnitTests = 41,
    PythonCodeExecuteAgainstUnitTests = 42,
    PythonProjectTests = 43,
    PythonProjectUnitTests = 44,
    PostgresPrepareDatabaseAndRunQueries = 45,
    PostgresRunQueriesAndCheckDatabase = 46,
    PostgresRunSkeletonRunQueriesAndCheckDatabase = 47,
}

impl ExecutionStrategyType {
    pub fn is_found(self) -> bool {
        self != ExecutionStrategyType::NotFound
    }
}

impl std::fmt::Display for ExecutionStrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
