use thiserror::Error;

use crate::domain::{MessageId, QueueName};

/// Errors reported by the queue transport (lease renewal, acknowledgment,
/// queue lookup).
///
/// Only `Transient` failures are retried by the lease extender; everything
/// else is routed to the error handling strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Host resolution / connectivity failure. Worth retrying.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// The transport rejected the call (unknown receipt, access denied, ...).
    #[error("transport rejected the request: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// How a worker can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Recoverable application error.
    #[error("{0}")]
    Failed(String),

    /// Unrecoverable failure (also produced when the worker panics).
    #[error("fatal worker failure: {0}")]
    Fatal(String),

    /// The worker observed the interruption signal and gave up.
    #[error("worker interrupted")]
    Interrupted,
}

impl WorkerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        WorkerError::Failed(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        WorkerError::Fatal(reason.into())
    }
}

/// Raised by an [`ErrorHandlingStrategy`](crate::processing::ErrorHandlingStrategy)
/// hook when it decides the failure must propagate instead of being swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("message {message_id}: {reason}")]
pub struct StrategyError {
    pub message_id: MessageId,
    pub reason: String,
}

impl StrategyError {
    pub fn new(message_id: MessageId, reason: impl Into<String>) -> Self {
        Self {
            message_id,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LeaseholdError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("queue not found: {0}")]
    QueueNotFound(QueueName),

    #[error("could not schedule lease extension for message {0}: {1}")]
    LeaseScheduling(MessageId, String),

    #[error("could not submit message {0} for processing: {1}")]
    TaskRejected(MessageId, String),

    #[error("payload of message {0} could not be decoded: {1}")]
    Decode(MessageId, String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, LeaseholdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_transient() {
        assert!(TransportError::Transient("dns".into()).is_transient());
        assert!(!TransportError::Permanent("gone".into()).is_transient());
    }

    #[test]
    fn strategy_error_names_the_message() {
        let err = StrategyError::new(MessageId::new("m-1"), "boom");
        assert_eq!(err.to_string(), "message m-1: boom");
    }
}
