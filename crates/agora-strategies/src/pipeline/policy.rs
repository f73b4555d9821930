//! Policies that specialise the pipeline per language and mode

use std::path::Path;

use crate::process::ProcessRequest;

/// Compile before running any test. A failed compile ends the execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileStep {
    pub compiler: String,
    /// Flags placed before `-o <binary> <source>`
    pub args: Vec<String>,
    pub source_file: String,
    pub binary_file: String,
}

impl CompileStep {
    pub fn cpp(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
            args: vec!["-O2".into(), "-std=c++17".into()],
            source_file: "main.cpp".into(),
            binary_file: "main".into(),
        }
    }

    pub(crate) fn request(&self, work_dir: &Path, time_limit_ms: u64, memory_limit_bytes: u64) -> ProcessRequest {
        ProcessRequest::new(&self.compiler, time_limit_ms, memory_limit_bytes)
            .args(self.args.iter().cloned())
            .args([
                "-o".to_string(),
                work_dir.join(&self.binary_file).to_string_lossy().into_owned(),
                work_dir.join(&self.source_file).to_string_lossy().into_owned(),
            ])
            .working_dir(work_dir)
            .unrestricted()
    }
}

/// How the candidate is started for each run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// `interpreter args.. <working dir>/<file_name>`
    Script {
        interpreter: String,
        args: Vec<String>,
        file_name: String,
    },
    /// The binary produced by the compile step
    Compiled,
    /// `interpreter args..` inside the working directory
    InWorkingDir { interpreter: String, args: Vec<String> },
}

impl Launch {
    pub fn python_script(python: impl Into<String>) -> Self {
        Launch::Script {
            interpreter: python.into(),
            args: vec!["-I".into(), "-OO".into()],
            file_name: "solution.py".into(),
        }
    }

    pub fn node_script(node: impl Into<String>) -> Self {
        Launch::Script {
            interpreter: node.into(),
            args: Vec::new(),
            file_name: "solution.js".into(),
        }
    }

    /// `python -E -s -m unittest discover`
    pub fn python_discover(python: impl Into<String>) -> Self {
        Launch::InWorkingDir {
            interpreter: python.into(),
            args: ["-E", "-s", "-m", "unittest", "discover"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    /// File the learner code is saved to, if any
    pub fn code_file(&self) -> Option<&str> {
        match self {
            Launch::Script { file_name, .. } => Some(file_name),
            _ => None,
        }
    }
}

/// How each test's input reaches the candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShaper {
    /// Code saved once, test input on stdin
    Stdin,
    /// Code followed by the test input, rewritten per test
    AppendToCode,
    /// Test input followed by the code (class imports stripped), rewritten per test
    PrependToCode,
    /// Archive unpacked; test input becomes the test module under `tests/`
    TestModule,
    /// Archive unpacked; test input split into classes under `project/`
    ProjectFiles,
}

impl InputShaper {
    pub fn uses_stdin(self) -> bool {
        self == InputShaper::Stdin
    }
}

/// How a run's output is turned into the text given to the checker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputParser {
    /// Plain stdout
    Stdout,
    /// One `unittest` report per test case (`ERROR:`/`FAIL:` blocks)
    UnitTestCase,
    /// Accumulated `unittest` suite, judged by pass-count deltas
    UnitTestDiff,
}

/// Order in which tests are run; results are always reported in declaration order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    Declaration,
    /// Trial tests first, each group by ascending `order_by`
    #[default]
    TrialFirst,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_request() {
        let step = CompileStep::cpp("/usr/bin/g++");
        let request = step.request(Path::new("/work/a"), 10_000, 1 << 29);

        assert_eq!(
            request.args,
            vec!["-O2", "-std=c++17", "-o", "/work/a/main", "/work/a/main.cpp"]
        );
        assert!(!request.restricted);
        assert_eq!(request.working_dir.as_deref(), Some(Path::new("/work/a")));
    }

    #[test]
    fn test_launch_helpers() {
        assert_eq!(Launch::python_script("python3").code_file(), Some("solution.py"));
        assert_eq!(Launch::Compiled.code_file(), None);
        assert!(InputShaper::Stdin.uses_stdin());
        assert!(!InputShaper::PrependToCode.uses_stdin());
    }
}
