//! Worker ports - the application code that processes a message.

use async_trait::async_trait;

use crate::domain::Message;
use crate::error::WorkerError;

/// Processes one message and produces an output.
///
/// The worker gets the whole message so it can read attributes as well as
/// the payload. One instance is shared by all worker tasks, so it should be
/// stateless (or synchronize internally).
///
/// Long-running workers are cancelled at their next `.await` when the
/// handler is force-stopped; returning `WorkerError::Interrupted` is the
/// explicit way to give up early.
#[async_trait]
pub trait MessageWorker<I, O>: Send + Sync {
    async fn work(&self, message: &Message<I>) -> Result<O, WorkerError>;
}

/// Called with input and output after the worker returned normally,
/// before the message is acknowledged.
pub trait CompletionCallback<I, O>: Send + Sync {
    fn on_completed(&self, input: &I, output: &O);
}

impl<I, O, F> CompletionCallback<I, O> for F
where
    F: Fn(&I, &O) + Send + Sync,
{
    fn on_completed(&self, input: &I, output: &O) {
        self(input, output)
    }
}

/// Callback used when the host does not register one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl<I, O> CompletionCallback<I, O> for NoopCallback {
    fn on_completed(&self, _input: &I, _output: &O) {}
}
