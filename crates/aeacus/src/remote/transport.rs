//! HTTP calls to remote execution workers

use std::time::Duration;

use agora_common::{ExecutionResult, JudgeError, JudgeResult, Submission, TestResult};
use anyhow::Context;
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run a tests-execution submission on `endpoint`
    async fn run_submission(
        &self,
        endpoint: &str,
        submission: &Submission,
    ) -> JudgeResult<ExecutionResult<TestResult>>;
}

/// JSON over HTTP: `POST {endpoint}/execute`
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

fn delegation(endpoint: &str, e: impl std::fmt::Display) -> JudgeError {
    JudgeError::RemoteDelegation(format!("{endpoint}: {e}"))
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn run_submission(
        &self,
        endpoint: &str,
        submission: &Submission,
    ) -> JudgeResult<ExecutionResult<TestResult>> {
        let url = format!("{}/execute", endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(|e| delegation(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(delegation(endpoint, format!("HTTP {status}: {body}")));
        }

        response
            .json::<ExecutionResult<TestResult>>()
            .await
            .map_err(|e| delegation(endpoint, e))
    }
}
