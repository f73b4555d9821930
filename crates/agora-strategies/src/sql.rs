//! Database strategies.
//!
//! Every test runs inside its own transaction on a schema named once per
//! execution. Learner scripts run on a restricted login that only holds
//! privileges on that schema; the schema is created before and dropped after
//! each test by the administrative login. The learner transaction is always
//! rolled back, and a script that ends it is reported as a failure.

use std::sync::Arc;
use std::time::Instant;

use agora_common::{
    ExecutionResult, JudgeError, JudgeResult, ProcessExecutionResult, ProcessOutcome, TestCase,
    TestResult, TestsInput,
};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::checker::OutputChecker;
use crate::context::ExecutionContext;
use crate::pipeline::{
    OrderingPolicy, ResultSlots, TestsExecution, check_and_get_test_result, evaluation_order,
};
use crate::settings::BaseOverhead;

/// SQLSTATE for `statement_timeout` cancellations
const QUERY_CANCELED: &str = "57014";

const TRANSACTION_LEFT: &str = "The script ended the surrounding transaction";

/// Failure of learner SQL inside a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlRunError {
    Timeout,
    Failed(String),
}

pub type Rows = Vec<Vec<Option<String>>>;

/// Opens isolated, always rolled back scopes.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn open_scope(&self, schema: &str, statement_timeout_ms: u64) -> JudgeResult<Box<dyn SqlScope>>;
}

/// One transaction bound to one schema
#[async_trait]
pub trait SqlScope: Send {
    /// Run statements, discarding rows
    async fn execute(&mut self, script: &str) -> Result<(), SqlRunError>;

    /// Run statements and collect rows as text
    async fn query(&mut self, script: &str) -> Result<Rows, SqlRunError>;

    /// Roll everything back
    async fn finish(&mut self) -> JudgeResult<()>;
}

/// Quote a PostgreSQL identifier
fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn database(e: sqlx::Error) -> JudgeError {
    JudgeError::Database(e.to_string())
}

async fn connect_pool(url: &str, max_connections: u32) -> JudgeResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| JudgeError::Database(format!("Failed to connect: {e}")))
}

/// PostgreSQL backend: an administrative pool that manages schemas and a
/// restricted pool that runs learner scripts
#[derive(Debug, Clone)]
pub struct PgSqlBackend {
    admin: PgPool,
    learner: PgPool,
    learner_role: String,
}

impl PgSqlBackend {
    pub async fn connect(admin_url: &str, learner_url: &str, max_connections: u32) -> JudgeResult<Self> {
        let admin = connect_pool(admin_url, max_connections).await?;
        let learner = connect_pool(learner_url, max_connections).await?;

        let learner_role: String = sqlx::query_scalar("SELECT current_user::text")
            .fetch_one(&learner)
            .await
            .map_err(database)?;
        let admin_role: String = sqlx::query_scalar("SELECT current_user::text")
            .fetch_one(&admin)
            .await
            .map_err(database)?;
        if learner_role == admin_role {
            return Err(JudgeError::Database(format!(
                "Learner scripts must not run as the administrative role {admin_role}"
            )));
        }

        Ok(Self {
            admin,
            learner,
            learner_role,
        })
    }

    async fn drop_schema(&self, schema: &str) -> JudgeResult<()> {
        sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", ident(schema)))
            .execute(&self.admin)
            .await
            .map_err(|e| JudgeError::Database(format!("Failed to drop schema {schema}: {e}")))?;
        Ok(())
    }

    async fn begin_learner(&self, schema: &str, statement_timeout_ms: u64) -> JudgeResult<PgSqlScope> {
        let mut tx = self.learner.begin().await.map_err(database)?;
        let setup = format!(
            "SET LOCAL search_path TO {}; SET LOCAL statement_timeout = {statement_timeout_ms};",
            ident(schema)
        );
        (&mut *tx).execute(sqlx::raw_sql(&setup)).await.map_err(database)?;

        // Forces an id, so a script that commits or rolls back shows up as a different one
        let xid: String = sqlx::query_scalar("SELECT txid_current()::text")
            .fetch_one(&mut *tx)
            .await
            .map_err(database)?;

        Ok(PgSqlScope {
            backend: self.clone(),
            schema: schema.to_string(),
            tx: Some(tx),
            xid,
        })
    }
}

#[async_trait]
impl SqlBackend for PgSqlBackend {
    async fn open_scope(&self, schema: &str, statement_timeout_ms: u64) -> JudgeResult<Box<dyn SqlScope>> {
        let setup = format!(
            "CREATE SCHEMA {schema}; GRANT USAGE, CREATE ON SCHEMA {schema} TO {role};",
            schema = ident(schema),
            role = ident(&self.learner_role)
        );
        sqlx::raw_sql(&setup).execute(&self.admin).await.map_err(database)?;

        match self.begin_learner(schema, statement_timeout_ms).await {
            Ok(scope) => Ok(Box::new(scope)),
            Err(e) => {
                self.drop_schema(schema).await?;
                Err(e)
            }
        }
    }
}

struct PgSqlScope {
    backend: PgSqlBackend,
    schema: String,
    tx: Option<Transaction<'static, Postgres>>,
    xid: String,
}

impl PgSqlScope {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, SqlRunError> {
        self.tx
            .as_mut()
            .ok_or_else(|| SqlRunError::Failed("Scope already finished".into()))
    }

    async fn ensure_same_transaction(&mut self) -> Result<(), SqlRunError> {
        let expected = self.xid.clone();
        let tx = self.tx()?;
        let current: Option<String> = sqlx::query_scalar("SELECT txid_current_if_assigned()::text")
            .fetch_one(&mut **tx)
            .await
            .map_err(run_error)?;
        if current.as_deref() == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(SqlRunError::Failed(TRANSACTION_LEFT.into()))
        }
    }
}

fn run_error(err: sqlx::Error) -> SqlRunError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => SqlRunError::Timeout,
        sqlx::Error::Database(db) => SqlRunError::Failed(db.message().to_string()),
        _ => SqlRunError::Failed(err.to_string()),
    }
}

fn row_cells(row: &PgRow) -> Vec<Option<String>> {
    // The simple query protocol returns every column as text
    (0..row.len())
        .map(|i| row.try_get_unchecked::<Option<String>, _>(i).unwrap_or(None))
        .collect()
}

#[async_trait]
impl SqlScope for PgSqlScope {
    async fn execute(&mut self, script: &str) -> Result<(), SqlRunError> {
        let tx = self.tx()?;
        (&mut **tx).execute(sqlx::raw_sql(script)).await.map_err(run_error)?;
        self.ensure_same_transaction().await
    }

    async fn query(&mut self, script: &str) -> Result<Rows, SqlRunError> {
        let tx = self.tx()?;
        let rows = (&mut **tx).fetch_all(sqlx::raw_sql(script)).await.map_err(run_error)?;
        self.ensure_same_transaction().await?;
        Ok(rows.iter().map(row_cells).collect())
    }

    async fn finish(&mut self) -> JudgeResult<()> {
        let rolled_back = match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| JudgeError::Database(format!("Rollback failed: {e}"))),
            None => Ok(()),
        };
        self.backend.drop_schema(&self.schema).await?;
        rolled_back
    }
}

/// First statement in `script` that ends or replaces the surrounding
/// transaction, as its leading keywords.
///
/// Statements are split on `;` outside quoted text, comments and
/// dollar-quoted bodies, so function bodies with `BEGIN ... END;` pass.
pub fn transaction_control(script: &str) -> Option<String> {
    statement_heads(script).into_iter().find(|head| {
        let words: Vec<&str> = head.split_whitespace().collect();
        match words.as_slice() {
            [first, ..] if ["BEGIN", "COMMIT", "END", "ABORT", "ROLLBACK"].contains(first) => true,
            ["START", "TRANSACTION", ..] | ["PREPARE", "TRANSACTION", ..] => true,
            _ => false,
        }
    })
}

/// Upper-cased first two words of every statement
fn statement_heads(script: &str) -> Vec<String> {
    let mut heads = Vec::new();
    let mut current = String::new();
    let mut finish = |current: &mut String| {
        let head: Vec<String> = current
            .split_whitespace()
            .take(2)
            .map(str::to_ascii_uppercase)
            .collect();
        if !head.is_empty() {
            heads.push(head.join(" "));
        }
        current.clear();
    };

    let mut i = 0;
    while let Some(c) = script[i..].chars().next() {
        let rest = &script[i..];
        let skipped = match c {
            '\'' if current.ends_with(['E', 'e']) => Some(escaped_closing(rest)),
            '\'' | '"' => Some(closing(rest, 1, &rest[..1])),
            '-' if rest.starts_with("--") => Some(rest.find('\n').unwrap_or(rest.len())),
            '/' if rest.starts_with("/*") => Some(closing(rest, 2, "*/")),
            '$' => dollar_tag(rest).map(|tag| closing(rest, tag.len(), tag)),
            _ => None,
        };

        match skipped {
            Some(len) => {
                current.push(' ');
                i += len.max(1);
            }
            None if c == ';' => {
                finish(&mut current);
                i += 1;
            }
            None => {
                current.push(c);
                i += c.len_utf8();
            }
        }
    }
    finish(&mut current);
    heads
}

/// Length of `rest` up to and including the first `end` found after `start` bytes
fn closing(rest: &str, start: usize, end: &str) -> usize {
    rest[start..]
        .find(end)
        .map_or(rest.len(), |at| start + at + end.len())
}

/// Length of an `E'..'` body where backslash escapes the next character
fn escaped_closing(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    rest.len()
}

/// `$$` or `$tag$` at the start of `rest`
fn dollar_tag(rest: &str) -> Option<&str> {
    let end = rest[1..].find('$')? + 2;
    let tag = &rest[1..end - 1];
    let valid = tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit());
    valid.then(|| &rest[..end])
}

/// Which scripts run, in order, for each test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlMode {
    /// Test input prepares the database, learner queries produce the output
    PrepareDatabaseAndRunQueries,
    /// Learner queries modify the database, test input reads it back
    RunQueriesAndCheckDatabase,
    /// Task skeleton, then learner queries, then the test input reads the database
    RunSkeletonRunQueriesAndCheckDatabase,
}

/// Text compared with the expected output: one cell per line, `NULL` for nulls
pub fn format_rows(rows: &Rows) -> String {
    rows.iter()
        .flatten()
        .map(|cell| cell.as_deref().unwrap_or("NULL"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct SqlStrategy {
    backend: Arc<dyn SqlBackend>,
    mode: SqlMode,
    statement_timeout_ms: u64,
}

impl SqlStrategy {
    pub fn new(backend: Arc<dyn SqlBackend>, mode: SqlMode, statement_timeout_ms: u64) -> Self {
        Self {
            backend,
            mode,
            statement_timeout_ms,
        }
    }

    async fn run_scripts(
        &self,
        scope: &mut dyn SqlScope,
        context: &ExecutionContext<TestsInput>,
        test: &TestCase,
    ) -> Result<Rows, SqlRunError> {
        if let Some(statement) = transaction_control(&context.code) {
            return Err(SqlRunError::Failed(format!(
                "Transaction control statements are not allowed: {statement}"
            )));
        }

        match self.mode {
            SqlMode::PrepareDatabaseAndRunQueries => {
                scope.execute(&test.input).await?;
                scope.query(&context.code).await
            }
            SqlMode::RunQueriesAndCheckDatabase => {
                scope.execute(&context.code).await?;
                scope.query(&test.input).await
            }
            SqlMode::RunSkeletonRunQueriesAndCheckDatabase => {
                if let Some(skeleton) = context.input.task_skeleton.as_deref() {
                    scope.execute(skeleton).await?;
                }
                scope.execute(&context.code).await?;
                scope.query(&test.input).await
            }
        }
    }

    async fn run_test(
        &self,
        schema: &str,
        context: &ExecutionContext<TestsInput>,
        test: &TestCase,
    ) -> JudgeResult<ProcessExecutionResult> {
        let timeout_ms = match context.time_limit_ms {
            0 => self.statement_timeout_ms,
            limit => limit.min(self.statement_timeout_ms),
        };
        let mut scope = self.backend.open_scope(schema, timeout_ms).await?;
        let start = Instant::now();
        let outcome = self.run_scripts(scope.as_mut(), context, test).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        scope.finish().await?;

        Ok(match outcome {
            Ok(rows) => ProcessExecutionResult::success(format_rows(&rows), elapsed_ms),
            Err(SqlRunError::Timeout) => {
                ProcessExecutionResult::failure(ProcessOutcome::TimeLimitExceeded, "", elapsed_ms)
            }
            Err(SqlRunError::Failed(message)) => {
                ProcessExecutionResult::failure(ProcessOutcome::RuntimeError, message, elapsed_ms)
            }
        })
    }
}

#[async_trait]
impl TestsExecution for SqlStrategy {
    async fn execute_tests(
        &self,
        context: &ExecutionContext<TestsInput>,
    ) -> JudgeResult<ExecutionResult<TestResult>> {
        let schema = format!("s_{}", Uuid::new_v4().simple());
        tracing::debug!(submission_id = %context.submission_id, schema = %schema, "Running database tests");

        let checker = OutputChecker::new(context.input.checker);
        let tests = &context.input.tests;
        let mut slots = ResultSlots::new(tests.len());

        for index in evaluation_order(tests, OrderingPolicy::TrialFirst) {
            let test = &tests[index];
            let run = self.run_test(&schema, context, test).await?;
            let result = check_and_get_test_result(
                test,
                &run,
                &checker,
                &run.stdout,
                BaseOverhead::default(),
                context,
            );
            slots.put(index, result);
        }

        Ok(ExecutionResult::Completed {
            results: slots.into_results(),
        })
    }
}
