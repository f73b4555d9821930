//! Shared submission queue
//!
//! Processors with different admission rules drain the same queue, so a
//! processor takes the oldest submission it admits and leaves everything
//! else where it is. Nothing is removed from the queue unless it is kept.

use agora_common::Submission;
use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::redis;

/// How many of the oldest entries a Redis consumer inspects per retrieval
const SCAN_WINDOW: isize = 64;

pub type AdmissionCheck<'a> = &'a (dyn Fn(&Submission) -> bool + Send + Sync);

/// A queue drained concurrently by every processor loop
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    /// Remove and return the oldest submission accepted by `admits`.
    /// Rejected submissions keep their position.
    async fn take_first(&self, admits: AdmissionCheck<'_>) -> Result<Option<Submission>>;
}

/// Redis list queue: producers LPUSH, the oldest entry sits at the right end
pub struct RedisSubmissionQueue {
    pool: deadpool_redis::Pool,
    key: String,
    dead_letter_key: String,
}

impl RedisSubmissionQueue {
    pub fn new(pool: deadpool_redis::Pool, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            pool,
            dead_letter_key: format!("{key}_dlq"),
            key,
        }
    }

    /// Move an unreadable payload to the dead letter list in one transaction
    async fn park(&self, conn: &mut deadpool_redis::Connection, payload: &str) -> Result<()> {
        let (_removed, _parked): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.key)
            .arg(-1)
            .arg(payload)
            .cmd("LPUSH")
            .arg(&self.dead_letter_key)
            .arg(payload)
            .query_async(&mut **conn)
            .await
            .context("Failed to park malformed submission")?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionQueue for RedisSubmissionQueue {
    async fn take_first(&self, admits: AdmissionCheck<'_>) -> Result<Option<Submission>> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get Redis connection")?;

        let window: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(-SCAN_WINDOW)
            .arg(-1)
            .query_async(&mut *conn)
            .await
            .context("Failed to read submission queue")?;

        // Oldest first
        for payload in window.iter().rev() {
            let submission = match serde_json::from_str::<Submission>(payload) {
                Ok(submission) => submission,
                Err(e) => {
                    // Unreadable payloads cannot reach the error path, park them instead
                    tracing::error!(
                        queue = %self.key,
                        "Malformed submission payload moved to {}: {}",
                        self.dead_letter_key,
                        e
                    );
                    self.park(&mut conn, payload).await?;
                    continue;
                }
            };

            if !admits(&submission) {
                continue;
            }

            // Zero means another consumer got there first
            let removed: i64 = redis::cmd("LREM")
                .arg(&self.key)
                .arg(-1)
                .arg(payload)
                .query_async(&mut *conn)
                .await
                .context("Failed to take submission from queue")?;
            if removed > 0 {
                return Ok(Some(submission));
            }
        }

        Ok(None)
    }
}
