//! Error types shared by the Agora execution services.

use thiserror::Error;

/// Main error type used across the strategy library and the worker service.
///
/// Learner failures (wrong output, crashes, limits) are never represented here:
/// they are ordinary verdicts. This type covers everything that prevents a
/// submission from being judged at all.
#[derive(Error, Debug)]
pub enum JudgeError {
    /// The declared strategy identifier is not registered
    #[error("Execution strategy not found: {0}")]
    StrategyNotFound(String),

    /// The strategy exists but cannot run this execution kind
    #[error("Execution strategy {strategy} does not support {kind}")]
    UnsupportedExecutionKind { strategy: String, kind: String },

    /// Task authoring or configuration mistake (skeleton metadata, project layout)
    #[error("Task configuration error: {0}")]
    Authoring(String),

    /// The submission payload is unusable (e.g. missing archive)
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    /// File system failure while preparing or cleaning a working directory
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    /// The process back end failed to launch or supervise a program
    #[error("Process error: {0}")]
    Process(String),

    /// Submitted archive could not be unpacked
    #[error("Archive error: {0}")]
    Archive(String),

    /// Database back end failure (not a learner query error)
    #[error("Database error: {0}")]
    Database(String),

    /// Remote worker call failed
    #[error("Remote delegation error: {0}")]
    RemoteDelegation(String),

    /// Every remote worker is busy
    #[error("No remote worker available")]
    NoWorkerAvailable,

    /// Submission queue unreachable or corrupt
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl JudgeError {
    /// Returns the stable error code string for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            JudgeError::StrategyNotFound(_) => "STRATEGY_NOT_FOUND",
            JudgeError::UnsupportedExecutionKind { .. } => "UNSUPPORTED_EXECUTION_KIND",
            JudgeError::Authoring(_) => "AUTHORING_ERROR",
            JudgeError::InvalidSubmission(_) => "INVALID_SUBMISSION",
            JudgeError::Io(_) => "FILE_ERROR",
            JudgeError::Process(_) => "PROCESS_ERROR",
            JudgeError::Archive(_) => "ARCHIVE_ERROR",
            JudgeError::Database(_) => "DATABASE_ERROR",
            JudgeError::RemoteDelegation(_) => "REMOTE_DELEGATION_ERROR",
            JudgeError::NoWorkerAvailable => "NO_WORKER_AVAILABLE",
            JudgeError::Queue(_) => "QUEUE_ERROR",
            JudgeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error is caused by task configuration rather than by the learner or the host
    pub fn is_authoring(&self) -> bool {
        matches!(self, JudgeError::Authoring(_))
    }
}

impl From<serde_json::Error> for JudgeError {
    fn from(err: serde_json::Error) -> Self {
        JudgeError::Serialization(err.to_string())
    }
}

/// Result type alias using JudgeError
pub type JudgeResult<T> = Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            JudgeError::StrategyNotFound("x".into()).error_code(),
            "STRATEGY_NOT_FOUND"
        );
        assert_eq!(JudgeError::NoWorkerAvailable.error_code(), "NO_WORKER_AVAILABLE");
        assert!(JudgeError::Authoring("count".into()).is_authoring());
        assert!(!JudgeError::Queue("down".into()).is_authoring());
    }
}
