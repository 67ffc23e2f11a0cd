//! Failure classification shared by handlers and the worker pool.

use thiserror::Error;

/// Error returned by a job handler.
///
/// The variant decides whether the queue redelivers the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Transient failure (network, timeout, rate limit); redeliver.
    #[error("{0}")]
    Retryable(String),
    /// Redelivery cannot help or would repeat a side effect.
    #[error("{0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Retryable(m) | HandlerError::Terminal(m) => m,
        }
    }
}

/// A job that no handler in this build can process. Always terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown job name: {0}")]
    UnknownJob(String),
    #[error("malformed payload for {name}: {reason}")]
    MalformedPayload { name: String, reason: String },
}

impl From<DispatchError> for HandlerError {
    fn from(err: DispatchError) -> Self {
        HandlerError::Terminal(err.to_string())
    }
}
