//! Python `unittest` report grammar.
//!
//! A report is recognised when the output starts with a result stream line made
//! only of `.` (pass), `F` (fail) and `E` (error), and its last line is the
//! summary, either `OK` (optionally `OK (...)`) or `FAILED (...)`:
//!
//! ```text
//! ..F.
//! ======================================================================
//! FAIL: test_sum (tests.SumTests)
//! ----------------------------------------------------------------------
//! AssertionError: 3 != 4
//!
//! ----------------------------------------------------------------------
//! Ran 4 tests in 0.001s
//!
//! FAILED (failures=1)
//! ```
//!
//! Anything else is a format violation and produces [`NOT_CAPTURED_MESSAGE`].

use agora_common::{JudgeError, JudgeResult, ProcessExecutionResult, ProcessOutcome};
use regex::Regex;

pub const NOT_CAPTURED_MESSAGE: &str =
    "Failing tests are not captured correctly. Please contact an Administrator.";
pub const TEST_PASSED_MESSAGE: &str = "Test Passed!";
pub const NO_COVERAGE_MESSAGE: &str = "No functionality covering this test!";
pub const BASELINE_FAILED_MESSAGE: &str = "Not all tests passed on the correct solution.";

/// Parsed summary of one `unittest` run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTestReport {
    pub total: usize,
    pub passed: usize,
    pub ok: bool,
}

/// Parse a report, `None` on any format violation.
pub fn parse_report(output: &str) -> Option<UnitTestReport> {
    let text = output.trim();
    let mut lines = text.lines();

    let stream = lines.next()?.trim_end();
    if stream.is_empty() || !stream.chars().all(|c| matches!(c, '.' | 'F' | 'E')) {
        return None;
    }

    // Summary must be on its own line after the stream
    let summary = lines.last()?.trim();
    let ok = if summary == "OK" || (summary.starts_with("OK (") && summary.ends_with(')')) {
        true
    } else if summary.starts_with("FAILED (") && summary.ends_with(')') {
        false
    } else {
        return None;
    };

    Some(UnitTestReport {
        total: stream.len(),
        passed: stream.chars().filter(|&c| c == '.').count(),
        ok,
    })
}

/// `unittest` writes its report to stderr; treat such a run as a successful one
/// whose output is the report.
pub fn promote_stderr_report(result: &mut ProcessExecutionResult) {
    if parse_report(&result.stderr).is_some() {
        result.stdout = std::mem::take(&mut result.stderr);
        result.outcome = ProcessOutcome::Success;
    }
}

/// Attributes the change in passing cases to the test injected last.
///
/// The framework reruns the whole accumulated suite each time, so only the
/// difference from the immediately preceding run is meaningful. The first run is
/// the baseline.
#[derive(Debug, Default)]
pub struct PassCountTracker {
    runs: usize,
    previous: Option<usize>,
}

impl PassCountTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message for a run that produced output.
    pub fn observe(&mut self, output: &str) -> String {
        let is_first = self.runs == 0;
        self.runs += 1;

        let Some(report) = parse_report(output) else {
            return NOT_CAPTURED_MESSAGE.to_string();
        };

        let message = if is_first {
            if report.passed == report.total {
                TEST_PASSED_MESSAGE
            } else {
                BASELINE_FAILED_MESSAGE
            }
        } else if self.previous.is_some_and(|previous| report.passed < previous) {
            TEST_PASSED_MESSAGE
        } else {
            NO_COVERAGE_MESSAGE
        };

        self.previous = Some(report.passed);
        message.to_string()
    }

    /// Record a run that crashed or timed out.
    pub fn skip(&mut self) {
        self.runs += 1;
    }
}

/// Message derived from a single report of learner code run against unit tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitTestMessage {
    /// An `ERROR:` block; carries the exception text
    Error(String),
    /// A `FAIL:` block; carries the assertion text
    Failure(String),
    Passed,
    NotCaptured,
}

impl UnitTestMessage {
    pub fn from_output(output: &str) -> Self {
        if let Some(text) = block_exception(output, "ERROR:") {
            return UnitTestMessage::Error(text);
        }
        if let Some(text) = block_exception(output, "FAIL:") {
            return UnitTestMessage::Failure(text);
        }
        match parse_report(output) {
            Some(report) if report.ok && report.passed == report.total => UnitTestMessage::Passed,
            _ => UnitTestMessage::NotCaptured,
        }
    }

    /// Apply to a run: errors turn the run into a runtime error, everything else
    /// becomes the text handed to the checker.
    pub fn apply(self, run: &mut ProcessExecutionResult) -> String {
        match self {
            UnitTestMessage::Error(text) => {
                run.outcome = ProcessOutcome::RuntimeError;
                run.stderr = text;
                NOT_CAPTURED_MESSAGE.to_string()
            }
            UnitTestMessage::Failure(text) => text,
            UnitTestMessage::Passed => TEST_PASSED_MESSAGE.to_string(),
            UnitTestMessage::NotCaptured => NOT_CAPTURED_MESSAGE.to_string(),
        }
    }
}

/// Exception text of the block starting with `header`: from the last
/// `<Name>Error:` line after the header up to the final separator line.
fn block_exception(output: &str, header: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.iter().position(|l| l.starts_with(header))?;
    let separator = lines.iter().rposition(|l| l.starts_with("--"))?;
    if separator <= start {
        return None;
    }

    let exception = (start + 1..separator).rev().find(|&i| is_exception_line(lines[i]))?;
    Some(lines[exception..separator].join("\n").trim_end().to_string())
}

fn is_exception_line(line: &str) -> bool {
    match line.find("Error:") {
        Some(idx) => line[..idx].chars().all(|c| c.is_alphanumeric() || c == '_'),
        None => false,
    }
}

/// Class under test, declared in the skeleton as `# class_name <Name>`.
pub fn class_name_from_skeleton(skeleton: Option<&str>) -> JudgeResult<String> {
    let skeleton = skeleton.filter(|s| !s.trim().is_empty()).ok_or_else(|| {
        JudgeError::Authoring(
            "Solution Skeleton is required. Should be in the format: \"# class_name \" followed by the test class's name."
                .into(),
        )
    })?;

    skeleton
        .lines()
        .find_map(|line| {
            let rest = line.trim().strip_prefix('#')?.trim_start();
            let name = rest.strip_prefix("class_name")?;
            if !name.starts_with(char::is_whitespace) {
                return None;
            }
            name.split_whitespace().next().map(str::to_string)
        })
        .ok_or_else(|| {
            JudgeError::Authoring(
                "class_name not found in Solution Skeleton. Expecting \"# class_name \" followed by the test class's name."
                    .into(),
            )
        })
}

/// Remove lines importing `class_name`, which is injected by the test instead.
pub fn strip_class_imports(code: &str, class_name: &str) -> String {
    let name = regex::escape(class_name);
    let pattern = format!(
        r"(?m)^(?:from[ \t]+{name}[ \t]+import[ \t].*|import[ \t]+{name}(?:[ \t].*)?)$"
    );
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(code, "").into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid import pattern");
            code.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAILED_REPORT: &str = "\
....F
======================================================================
FAIL: test_sum (__main__.SumTests)
----------------------------------------------------------------------
Traceback (most recent call last):
  File \"solution.py\", line 9, in test_sum
    self.assertEqual(add(1, 2), 4)
AssertionError: 3 != 4

----------------------------------------------------------------------
Ran 5 tests in 0.001s

FAILED (failures=1)
";

    const ERROR_REPORT: &str = "\
E
======================================================================
ERROR: test_sum (__main__.SumTests)
----------------------------------------------------------------------
Traceback (most recent call last):
  File \"solution.py\", line 9, in test_sum
    self.assertEqual(ad(1, 2), 3)
NameError: name 'ad' is not defined

----------------------------------------------------------------------
Ran 1 test in 0.000s

FAILED (errors=1)
";

    fn ok_report(count: usize) -> String {
        format!(
            "{}\n----------------------------------------------------------------------\nRan {count} tests in 0.001s\n\nOK\n",
            ".".repeat(count)
        )
    }

    #[test]
    fn test_parse_report() {
        let report = parse_report(FAILED_REPORT).unwrap();
        assert_eq!(report, UnitTestReport { total: 5, passed: 4, ok: false });

        let report = parse_report(&ok_report(3)).unwrap();
        assert!(report.ok);
        assert_eq!(report.passed, 3);
    }

    #[test]
    fn test_format_violations() {
        assert_eq!(parse_report(""), None);
        assert_eq!(parse_report("OK"), None);
        assert_eq!(parse_report("Traceback (most recent call last):\nOK"), None);
        assert_eq!(parse_report("..\nRan 2 tests\n"), None);
    }

    #[test]
    fn test_tracker_attributes_delta_to_new_test() {
        let mut tracker = PassCountTracker::new();
        assert_eq!(tracker.observe(&ok_report(5)), TEST_PASSED_MESSAGE);
        // One more injected test breaks a previously passing case
        assert_eq!(tracker.observe(FAILED_REPORT), TEST_PASSED_MESSAGE);
        // Same pass count: the new test covers nothing
        assert_eq!(tracker.observe(FAILED_REPORT), NO_COVERAGE_MESSAGE);
    }

    #[test]
    fn test_tracker_baseline_and_violations() {
        let mut tracker = PassCountTracker::new();
        assert_eq!(tracker.observe(FAILED_REPORT), BASELINE_FAILED_MESSAGE);
        assert_eq!(tracker.observe("garbage"), NOT_CAPTURED_MESSAGE);
        // Comparison is still against the last parsed run
        assert_eq!(tracker.observe(&ok_report(4)), NO_COVERAGE_MESSAGE);

        let mut tracker = PassCountTracker::new();
        tracker.skip();
        assert_eq!(tracker.observe(&ok_report(2)), NO_COVERAGE_MESSAGE);
    }

    #[test]
    fn test_messages_from_blocks() {
        assert_eq!(
            UnitTestMessage::from_output(FAILED_REPORT),
            UnitTestMessage::Failure("AssertionError: 3 != 4".into())
        );
        assert_eq!(
            UnitTestMessage::from_output(ERROR_REPORT),
            UnitTestMessage::Error("NameError: name 'ad' is not defined".into())
        );
        assert_eq!(UnitTestMessage::from_output(&ok_report(2)), UnitTestMessage::Passed);
        assert_eq!(UnitTestMessage::from_output("SyntaxError"), UnitTestMessage::NotCaptured);
    }

    #[test]
    fn test_error_block_becomes_runtime_error() {
        let mut run = ProcessExecutionResult::failure(ProcessOutcome::RuntimeError, ERROR_REPORT, 5);
        promote_stderr_report(&mut run);
        assert_eq!(run.outcome, ProcessOutcome::Success);
        assert_eq!(run.stdout, ERROR_REPORT);

        let message = UnitTestMessage::from_output(&run.stdout).apply(&mut run);
        assert_eq!(message, NOT_CAPTURED_MESSAGE);
        assert_eq!(run.outcome, ProcessOutcome::RuntimeError);
        assert_eq!(run.stderr, "NameError: name 'ad' is not defined");
    }

    #[test]
    fn test_class_name_from_skeleton() {
        assert_eq!(
            class_name_from_skeleton(Some("# class_name Calculator\n")).unwrap(),
            "Calculator"
        );
        assert!(class_name_from_skeleton(None).unwrap_err().is_authoring());
        assert!(class_name_from_skeleton(Some("# nothing here")).unwrap_err().is_authoring());
    }

    #[test]
    fn test_strip_class_imports() {
        let code = "from calc import Calculator\nimport calc\nimport calculus\nfrom calc import x\nclass T: pass\n";
        let stripped = strip_class_imports(code, "calc");
        assert_eq!(stripped, "\n\nimport calculus\n\nclass T: pass\n");
    }
}
