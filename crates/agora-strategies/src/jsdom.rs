//! Browser-style JavaScript tasks run under mocha with a JSDOM window.
//!
//! All tests are rendered into one program, one `it('TestN')` per test, each
//! evaluating the test input as a function body that receives the learner's
//! function as `result`. The program is run once with mocha's JSON reporter
//! and the report decides every test's message.

use std::sync::Arc;

use agora_common::{
    ExecutionResult, JudgeResult, ProcessOutcome, TestCase, TestResult, TestsInput,
};
use async_trait::async_trait;
use serde::Deserialize;

use crate::checker::OutputChecker;
use crate::context::ExecutionContext;
use crate::pipeline::{
    OrderingPolicy, TestsExecution, check_and_get_test_result, evaluation_order,
};
use crate::process::{ProcessExecutor, ProcessRequest};
use crate::settings::{BaseOverhead, JsModules};

const PROGRAM_FILE: &str = "solution.test.js";
const PASSED_MESSAGE: &str = "yes";
const INVALID_OUTPUT_MESSAGE: &str = "Invalid console output!";

/// Variables handed to every test function
const TEST_FUNC_VARIABLES: &[&str] = &["assert", "expect", "should", "sinon", "_"];

const TEMPLATE: &str = r#"let chai = require('#chai#'),
    sinonChai = require('#sinon_chai#'),
    sinon = require('#sinon#'),
    jsdom = require('#jsdom#'),
    jq = require('#jquery#'),
    handlebars = require('#handlebars#'),
    _ = require('#underscore#'),
    assert = chai.assert,
    expect = chai.expect,
    should = chai.should();

chai.use(sinonChai);
const { JSDOM } = jsdom;

describe('TestDOMScope', function() {
    let mutedConsole = {};
    before(function() {
        const window = (new JSDOM('...')).window;

        Object.defineProperty(window.Element.prototype, 'innerText', {
            get() { return this.textContent; },
            set(value) { this.textContent = value; }
        });

        global.window = window;
        global.document = window.document;
        global.$ = jq(window);
        global.handlebars = handlebars;
        global.Option = window.Option;
        global.Audio = window.Audio;
        global.Image = window.Image;

        Object.getOwnPropertyNames(window)
            .filter(function (prop) {
                return prop.toLowerCase().indexOf('html') >= 0;
            }).forEach(function (prop) {
                global[prop] = window[prop];
            });

        Object.keys(console)
            .forEach(function (prop) {
                mutedConsole[prop] = console[prop];
                console[prop] = new Function('');
            });
    });

    after(function() {
        Object.keys(mutedConsole)
            .forEach(function (prop) {
                console[prop] = mutedConsole[prop];
            });
    });
#tests#
});
"#;

pub struct JsDomStrategy {
    executor: Arc<dyn ProcessExecutor>,
    nodejs_path: String,
    modules: JsModules,
    overhead: BaseOverhead,
}

impl JsDomStrategy {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        nodejs_path: impl Into<String>,
        modules: JsModules,
        overhead: BaseOverhead,
    ) -> Self {
        Self {
            executor,
            nodejs_path: nodejs_path.into(),
            modules,
            overhead,
        }
    }

    /// Render the mocha program for `tests` (in run order).
    pub fn build_program(&self, code: &str, tests: &[&TestCase]) -> String {
        let user_function = code.trim().trim_matches(';');
        let quoted: Vec<String> = TEST_FUNC_VARIABLES.iter().map(|v| format!("'{v}'")).collect();
        let quoted = quoted.join(", ");
        let plain = TEST_FUNC_VARIABLES.join(", ");

        let mut rendered = String::new();
        for (n, test) in tests.iter().enumerate() {
            rendered.push_str(&format!(
                r#"
    it('Test{number}', function(done) {{
        let content = `{content}`;
        let inputData = content.trim();
        let code = {{
            run: {user_function}
        }};
        let testFunc = new Function('result', {quoted}, inputData);
        testFunc.call({{}}, code.run, {plain});
        done();
    }});"#,
                number = n + 1,
                content = escape_template_literal(&test.input),
            ));
        }

        let m = &self.modules;
        TEMPLATE
            .replace("#chai#", &m.chai)
            .replace("#sinon_chai#", &m.sinon_chai)
            .replace("#sinon#", &m.sinon)
            .replace("#jsdom#", &m.jsdom)
            .replace("#jquery#", &m.jquery)
            .replace("#handlebars#", &m.handlebars)
            .replace("#underscore#", &m.underscore)
            .replace("#tests#", &rendered)
    }
}

fn escape_template_literal(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Deserialize)]
struct MochaReport {
    #[serde(default)]
    tests: Vec<MochaTest>,
    #[serde(default)]
    failures: Vec<MochaTest>,
}

#[derive(Debug, Deserialize)]
struct MochaTest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    err: Option<MochaError>,
}

#[derive(Debug, Deserialize)]
struct MochaError {
    message: Option<String>,
}

/// Outcome of one mocha run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct JsonExecutionResult {
    /// Error affecting every test (hook failure, unreadable report)
    pub error: Option<String>,
    /// Per-test error keyed by position in the run
    pub test_errors: Vec<Option<String>>,
}

impl JsonExecutionResult {
    pub fn parse(output: &str, expected_tests: usize) -> Self {
        let json = match (output.find('{'), output.rfind('}')) {
            (Some(start), Some(end)) if start < end => &output[start..=end],
            _ => return Self::global(INVALID_OUTPUT_MESSAGE, expected_tests),
        };
        let report: MochaReport = match serde_json::from_str(json) {
            Ok(report) => report,
            Err(_) => return Self::global(INVALID_OUTPUT_MESSAGE, expected_tests),
        };

        if let Some(hook) = report.failures.iter().find(|f| f.title.contains("hook")) {
            let message = hook
                .err
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| hook.title.clone());
            return Self::global(&message, expected_tests);
        }

        let mut test_errors = vec![None; expected_tests];
        for test in &report.tests {
            let Some(n) = test
                .title
                .strip_prefix("Test")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| (1..=expected_tests).contains(n))
            else {
                continue;
            };
            test_errors[n - 1] = test.err.as_ref().and_then(|e| e.message.clone());
        }

        let reported: Vec<usize> = report
            .tests
            .iter()
            .filter_map(|t| t.title.strip_prefix("Test")?.parse().ok())
            .collect();
        for (i, slot) in test_errors.iter_mut().enumerate() {
            if !reported.contains(&(i + 1)) {
                *slot = Some("Test was not executed".to_string());
            }
        }

        Self {
            error: None,
            test_errors,
        }
    }

    fn global(message: &str, expected_tests: usize) -> Self {
        Self {
            error: Some(message.to_string()),
            test_errors: vec![None; expected_tests],
        }
    }

    /// Message handed to the checker for the test at `position`
    pub fn message(&self, position: usize) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        match self.test_errors.get(position).and_then(Option::as_ref) {
            Some(error) => format!("Unexpected error: {error}"),
            None => PASSED_MESSAGE.to_string(),
        }
    }
}

#[async_trait]
impl TestsExecution for JsDomStrategy {
    async fn execute_tests(
        &self,
        context: &ExecutionContext<TestsInput>,
    ) -> JudgeResult<ExecutionResult<TestResult>> {
        let tests = &context.input.tests;
        let order = evaluation_order(tests, OrderingPolicy::Declaration);
        let ordered: Vec<&TestCase> = order.iter().map(|&i| &tests[i]).collect();

        let program = context
            .write_file(PROGRAM_FILE, &self.build_program(&context.code, &ordered))
            .await?;

        let request = ProcessRequest::new(&self.nodejs_path, context.time_limit_ms, context.memory_limit_bytes)
            .args([
                self.modules.mocha.clone(),
                "-R".to_string(),
                "json".to_string(),
                program.to_string_lossy().into_owned(),
            ])
            .working_dir(context.working_dir());
        let mut run = self.executor.execute(request).await?;

        let report = JsonExecutionResult::parse(&run.stdout, ordered.len());
        // Mocha exits non-zero when tests fail; a readable report is a completed run
        if report.error.as_deref() != Some(INVALID_OUTPUT_MESSAGE)
            && run.outcome == ProcessOutcome::RuntimeError
        {
            run.outcome = ProcessOutcome::Success;
        }

        let checker = OutputChecker::new(context.input.checker);
        let mut results = vec![None; tests.len()];
        for (position, &index) in order.iter().enumerate() {
            let message = report.message(position);
            results[index] = Some(check_and_get_test_result(
                &tests[index],
                &run,
                &checker,
                &message,
                self.overhead,
                context,
            ));
        }

        Ok(ExecutionResult::Completed {
            results: results.into_iter().flatten().collect(),
        })
    }
}
