//! Output checkers

use agora_common::{CheckerKind, TestCase};

/// Result from comparing one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerResult {
    pub is_correct: bool,
    /// Explanation of the first difference, if any
    pub details: Option<String>,
}

impl CheckerResult {
    fn correct() -> Self {
        Self {
            is_correct: true,
            details: None,
        }
    }

    fn wrong(details: String) -> Self {
        Self {
            is_correct: false,
            details: Some(details),
        }
    }
}

/// Compares the expected output of a test with what the program produced.
pub trait Checker: Send + Sync {
    fn check(&self, expected: &str, actual: &str, test: &TestCase) -> CheckerResult;
}

/// Built-in line based checker
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputChecker {
    kind: CheckerKind,
}

impl OutputChecker {
    pub fn new(kind: CheckerKind) -> Self {
        Self { kind }
    }

    fn normalize(&self, text: &str) -> Vec<String> {
        let text = text.replace("\r\n", "\n");
        let mut lines: Vec<String> = match self.kind {
            CheckerKind::Exact => text.split('\n').map(str::to_string).collect(),
            CheckerKind::Trim | CheckerKind::Sort => {
                text.lines().map(|l| l.trim_end().to_string()).collect()
            }
            CheckerKind::CaseInsensitive => text
                .lines()
                .map(|l| l.trim_end().to_lowercase())
                .collect(),
        };

        if self.kind != CheckerKind::Exact {
            while lines.last().is_some_and(|l| l.is_empty()) {
                lines.pop();
            }
        }
        if self.kind == CheckerKind::Sort {
            lines.sort_unstable();
        }
        lines
    }
}

impl Checker for OutputChecker {
    fn check(&self, expected: &str, actual: &str, _test: &TestCase) -> CheckerResult {
        let expected = self.normalize(expected);
        let actual = self.normalize(actual);

        if expected == actual {
            return CheckerResult::correct();
        }

        let line = expected
            .iter()
            .zip(&actual)
            .position(|(e, a)| e != a)
            .unwrap_or_else(|| expected.len().min(actual.len()));

        let shown = |lines: &[String]| {
            lines
                .get(line)
                .map(|l| format!("'{}'", truncate(l, 100)))
                .unwrap_or_else(|| "end of output".to_string())
        };

        CheckerResult::wrong(format!(
            "Line {}: expected {}, found {}",
            line + 1,
            shown(&expected),
            shown(&actual)
        ))
    }
}

fn truncate(line: &str, max_chars: usize) -> String {
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
