//! Outcome records published for the persistence layer

use agora_common::SubmissionId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Tests,
    Output,
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Tests => "tests",
            OutcomeKind::Output => "output",
            OutcomeKind::Error => "error",
        }
    }
}

/// The single outcome of one submission
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeRecord {
    pub submission_id: SubmissionId,
    pub kind: OutcomeKind,
    pub payload: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(submission_id: SubmissionId, kind: OutcomeKind, payload: serde_json::Value) -> Self {
        Self {
            submission_id,
            kind,
            payload,
            processed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, record: &OutcomeRecord) -> Result<()>;
}

/// Appends outcome records to a Redis stream
pub struct RedisResultPublisher {
    pool: deadpool_redis::Pool,
    stream: String,
}

impl RedisResultPublisher {
    pub fn new(pool: deadpool_redis::Pool, stream: impl Into<String>) -> Self {
        Self {
            pool,
            stream: stream.into(),
        }
    }
}

#[async_trait]
impl ResultPublisher for RedisResultPublisher {
    async fn publish(&self, record: &OutcomeRecord) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get Redis connection")?;

        let stream_id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg("submission_id")
            .arg(record.submission_id.to_string())
            .arg("kind")
            .arg(record.kind.as_str())
            .arg("payload")
            .arg(record.payload.to_string())
            .arg("processed_at")
            .arg(record.processed_at.to_rfc3339())
            .query_async(&mut *conn)
            .await
            .context("Failed to publish outcome")?;

        tracing::debug!(
            submission_id = %record.submission_id,
            "Published {} outcome as {}",
            record.kind.as_str(),
            stream_id
        );
        Ok(())
    }
}
