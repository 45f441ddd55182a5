//! Error handling strategies.
//!
//! A strategy is consulted at four decision points of a message's life.
//! Returning `Ok(())` swallows the failure, returning `Err` propagates it:
//!
//! | hook                   | `Ok(())`                      | `Err(_)`                              |
//! |------------------------|-------------------------------|---------------------------------------|
//! | `handle_worker_error`  | message is acknowledged       | not acknowledged, redelivered later   |
//! | `handle_worker_fatal`  | message is acknowledged       | not acknowledged, redelivered later   |
//! | `handle_lease_failure` | lease extender keeps ticking  | lease extender stops                  |
//! | `handle_ack_failure`   | logged by the task only       | reported to the pool failure channel  |

use std::fmt;

use tracing::{error, warn};

use crate::domain::Message;
use crate::error::{StrategyError, TransportError, WorkerError};

pub trait ErrorHandlingStrategy<I>: Send + Sync {
    /// The worker returned a recoverable error.
    fn handle_worker_error(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError>;

    /// The worker failed fatally or panicked.
    fn handle_worker_fatal(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError>;

    /// Lease renewal failed for good (not retried, or retries exhausted).
    fn handle_lease_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError>;

    /// Acknowledgment failed after the work was done.
    fn handle_ack_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError>;
}

/// Logs everything; propagates worker failures and lease failures so the
/// message is not acknowledged, only logs acknowledgment failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandlingStrategy;

impl<I: fmt::Debug + Send + Sync> ErrorHandlingStrategy<I> for DefaultErrorHandlingStrategy {
    fn handle_worker_error(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        error!(
            message_id = %message.id(),
            payload = ?message.payload(),
            %error,
            "error while handling message"
        );
        Err(StrategyError::new(message.id().clone(), error.to_string()))
    }

    fn handle_worker_fatal(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        error!(
            message_id = %message.id(),
            payload = ?message.payload(),
            %error,
            "fatal error while handling message"
        );
        Err(StrategyError::new(message.id().clone(), error.to_string()))
    }

    fn handle_lease_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        error!(message_id = %message.id(), %error, "error while extending message lease");
        Err(StrategyError::new(message.id().clone(), error.to_string()))
    }

    fn handle_ack_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        error!(message_id = %message.id(), %error, "could not acknowledge message");
        Ok(())
    }
}

/// Every hook logs and propagates. Useful when the host wants one rule for
/// all failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAndRethrowStrategy;

impl LogAndRethrowStrategy {
    fn log_and_rethrow<I: fmt::Debug>(
        &self,
        what: &str,
        error: &dyn std::error::Error,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        error!(
            message_id = %message.id(),
            payload = ?message.payload(),
            %error,
            "{what}"
        );
        Err(StrategyError::new(message.id().clone(), error.to_string()))
    }
}

impl<I: fmt::Debug + Send + Sync> ErrorHandlingStrategy<I> for LogAndRethrowStrategy {
    fn handle_worker_error(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        self.log_and_rethrow("error while handling message", error, message)
    }

    fn handle_worker_fatal(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        self.log_and_rethrow("fatal error while handling message", error, message)
    }

    fn handle_lease_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        self.log_and_rethrow("error while extending message lease", error, message)
    }

    fn handle_ack_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        self.log_and_rethrow("could not acknowledge message", error, message)
    }
}

/// Logs recoverable worker errors and consumes the message anyway; only
/// fatal failures propagate. For messages that would fail the same way on
/// every redelivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAndConsumeStrategy;

impl<I: fmt::Debug + Send + Sync> ErrorHandlingStrategy<I> for LogAndConsumeStrategy {
    fn handle_worker_error(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        warn!(
            message_id = %message.id(),
            payload = ?message.payload(),
            %error,
            "dropping message after worker error"
        );
        Ok(())
    }

    fn handle_worker_fatal(
        &self,
        error: &WorkerError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        DefaultErrorHandlingStrategy.handle_worker_fatal(error, message)
    }

    fn handle_lease_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        warn!(message_id = %message.id(), %error, "lease extension failed, will retry on next tick");
        Ok(())
    }

    fn handle_ack_failure(
        &self,
        error: &TransportError,
        message: &Message<I>,
    ) -> Result<(), StrategyError> {
        DefaultErrorHandlingStrategy.handle_ack_failure(error, message)
    }
}
