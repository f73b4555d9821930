//! Submission and test data as received from the queue.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Submission ID type
pub type SubmissionId = Uuid;

/// Test case ID type
pub type TestCaseId = i64;

/// Which execution path a submission takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Run once per test case and check every output
    TestsExecution,
    /// Run once against a single input
    SimpleExecution,
}

impl std::fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionKind::TestsExecution => write!(f, "tests execution"),
            ExecutionKind::SimpleExecution => write!(f, "simple execution"),
        }
    }
}

/// Output comparison used by the tests path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckerKind {
    /// Byte-for-byte
    Exact,
    /// Ignore trailing whitespace on each line and trailing blank lines
    #[default]
    Trim,
    /// Compare lines as a multiset
    Sort,
    /// Like `Trim`, ignoring letter case
    CaseInsensitive,
}

/// A single test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub input: String,
    /// Expected output or check data, depending on the strategy
    pub expected_output: String,
    #[serde(default)]
    pub is_trial_test: bool,
    #[serde(default)]
    pub order_by: i32,
}

/// Input for the tests execution path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsInput {
    #[serde(default)]
    pub checker: CheckerKind,
    /// Task skeleton; some strategies read metadata lines from it
    #[serde(default)]
    pub task_skeleton: Option<String>,
    pub tests: Vec<TestCase>,
}

/// Input for the simple execution path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleInput {
    pub input: String,
    /// When absent the run is accepted on a clean exit
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// Strongly typed payload of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionInput {
    Tests(TestsInput),
    Simple(SimpleInput),
}

impl SubmissionInput {
    pub fn execution_kind(&self) -> ExecutionKind {
        match self {
            SubmissionInput::Tests(_) => ExecutionKind::TestsExecution,
            SubmissionInput::Simple(_) => ExecutionKind::SimpleExecution,
        }
    }
}

/// Submission pulled from the shared queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    /// Declared strategy identifier, e.g. `python-code`
    pub execution_strategy: String,
    #[serde(default)]
    pub code: String,
    /// Binary payload (project archives), base64 on the wire
    #[serde(default, with = "base64_bytes")]
    pub file_content: Option<Vec<u8>>,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    pub input: SubmissionInput,
    /// Diagnostic text written when processing fails
    #[serde(default)]
    pub processing_comment: Option<String>,
}

impl Submission {
    pub fn execution_kind(&self) -> ExecutionKind {
        self.input.execution_kind()
    }

    /// Number of tests carried, zero for the simple path
    pub fn test_count(&self) -> usize {
        match &self.input {
            SubmissionInput::Tests(tests) => tests.tests.len(),
            SubmissionInput::Simple(_) => 0,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
