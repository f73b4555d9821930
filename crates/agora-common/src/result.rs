//! Execution outcomes and verdicts

use serde::{Deserialize, Serialize};

use crate::submission::TestCaseId;

/// Classification of a single program run, as reported by the process back end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    Success,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
}

/// Raw result of one program run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExecutionResult {
    pub outcome: ProcessOutcome,
    pub stdout: String,
    pub stderr: String,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub exit_code: Option<i32>,
}

impl ProcessExecutionResult {
    /// Successful run with the given stdout
    pub fn success(stdout: impl Into<String>, time_used_ms: u64) -> Self {
        Self {
            outcome: ProcessOutcome::Success,
            stdout: stdout.into(),
            stderr: String::new(),
            time_used_ms,
            memory_used_bytes: 0,
            exit_code: Some(0),
        }
    }

    /// Failed run of the given classification
    pub fn failure(outcome: ProcessOutcome, stderr: impl Into<String>, time_used_ms: u64) -> Self {
        Self {
            outcome,
            stdout: String::new(),
            stderr: stderr.into(),
            time_used_ms,
            memory_used_bytes: 0,
            exit_code: None,
        }
    }

    /// Text a learner sees for a crashed run: stderr, or stdout when stderr is empty
    pub fn error_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Verdict for a single test or a single output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Passed all checks
    Accepted,
    /// Output does not match expected
    WrongAnswer,
    /// Exceeded time limit
    TimeLimitExceeded,
    /// Exceeded memory limit
    MemoryLimitExceeded,
    /// Program crashed, failed to compile or exited non-zero
    RuntimeError,
}

impl Verdict {
    /// Get short code for verdict
    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Accepted => "AC",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::RuntimeError => "RE",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Verdict::Accepted)
    }
}

/// Result of one test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: TestCaseId,
    pub verdict: Verdict,
    /// Diagnostic shown to the learner (checker details or runtime error text)
    pub message: Option<String>,
    pub checker_details: Option<String>,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
    pub is_trial_test: bool,
}

impl TestResult {
    pub fn accepted(id: TestCaseId, time_used_ms: u64, memory_used_bytes: u64) -> Self {
        Self {
            id,
            verdict: Verdict::Accepted,
            message: None,
            checker_details: None,
            time_used_ms,
            memory_used_bytes,
            is_trial_test: false,
        }
    }

    pub fn failed(id: TestCaseId, verdict: Verdict, message: impl Into<String>) -> Self {
        Self {
            id,
            verdict,
            message: Some(message.into()),
            checker_details: None,
            time_used_ms: 0,
            memory_used_bytes: 0,
            is_trial_test: false,
        }
    }
}

/// Result of a simple (single input) execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputResult {
    pub verdict: Verdict,
    pub output: String,
    pub message: Option<String>,
    pub time_used_ms: u64,
    pub memory_used_bytes: u64,
}

/// Aggregated result of running a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult<R> {
    /// All tests were run, results in declaration order
    Completed { results: Vec<R> },
    /// Compilation failed; nothing was run
    CompileError { compiler_comment: String },
}

impl<R> ExecutionResult<R> {
    pub fn is_compiled_successfully(&self) -> bool {
        matches!(self, ExecutionResult::Completed { .. })
    }

    /// Results, empty on compile error
    pub fn results(&self) -> &[R] {
        match self {
            ExecutionResult::Completed { results } => results,
            ExecutionResult::CompileError { .. } => &[],
        }
    }
}

impl ExecutionResult<TestResult> {
    /// Share of accepted tests, 0..=100
    pub fn score(&self) -> u32 {
        let results = self.results();
        if results.is_empty() {
            return 0;
        }
        let accepted = results.iter().filter(|r| !r.verdict.is_failure()).count();
        (accepted * 100 / results.len()) as u32
    }
}
