//! Outcomes of running one message through a worker.

use serde::Serialize;

use crate::error::WorkerError;

/// What happened when the worker ran.
///
/// Consumed by the acknowledgment step with a plain `match` instead of
/// nested error handling.
#[derive(Debug)]
pub enum TaskOutcome<O> {
    /// Worker returned normally.
    Processed(O),
    /// Worker returned a recoverable error.
    Failed(WorkerError),
    /// Worker failed fatally (explicit `Fatal` or panic).
    Fatal(WorkerError),
    /// Worker was interrupted. Not an error; the message is left for redelivery.
    Aborted,
}

impl<O> TaskOutcome<O> {
    /// Classify a worker result. `Interrupted` and `Fatal` get their own arms.
    pub fn from_result(result: Result<O, WorkerError>) -> Self {
        match result {
            Ok(output) => TaskOutcome::Processed(output),
            Err(WorkerError::Interrupted) => TaskOutcome::Aborted,
            Err(err @ WorkerError::Fatal(_)) => TaskOutcome::Fatal(err),
            Err(err @ WorkerError::Failed(_)) => TaskOutcome::Failed(err),
        }
    }
}

/// How a message task finally settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// Message acknowledged after successful processing.
    Processed,
    /// Worker failed, the strategy swallowed it, message acknowledged.
    Consumed,
    /// Acknowledgment was attempted and failed.
    AckFailed,
    /// Interrupted before completion; not acknowledged.
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::failed(WorkerError::failed("bad input"), "failed")]
    #[case::fatal(WorkerError::fatal("oom"), "fatal")]
    #[case::interrupted(WorkerError::Interrupted, "aborted")]
    fn worker_errors_are_classified(#[case] err: WorkerError, #[case] expected: &str) {
        let outcome = TaskOutcome::<()>::from_result(Err(err));
        let kind = match outcome {
            TaskOutcome::Processed(_) => "processed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::Fatal(_) => "fatal",
            TaskOutcome::Aborted => "aborted",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn ok_result_is_processed() {
        assert!(matches!(
            TaskOutcome::from_result(Ok::<_, WorkerError>(7)),
            TaskOutcome::Processed(7)
        ));
    }
}
