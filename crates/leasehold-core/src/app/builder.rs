//! MessageHandlerBuilder - wiring and fail-fast validation of a handler.
//!
//! # Checked at build time
//! - concurrency, batch size, extension interval and retry attempts are non-zero
//! - the extension interval is at least 5 seconds shorter than the queue's default lease

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::handler::{HandlerParts, MessageHandler};
use super::WorkerPool;
use crate::config::HandlerConfig;
use crate::domain::QueueDescriptor;
use crate::error::{LeaseholdError, Result};
use crate::lease::{LeaseScheduler, RetryPolicy};
use crate::ports::{CompletionCallback, MessageWorker, NoopCallback, QueueTransport};
use crate::processing::{DefaultErrorHandlingStrategy, ErrorHandlingStrategy, InFlightSet};

/// Minimum gap between the extension interval and the queue's default lease.
pub const LEASE_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// Builds a [`MessageHandler`].
///
/// # Example
/// ```ignore
/// let handler = MessageHandlerBuilder::new(queue, transport, scheduler, MyWorker)
///     .concurrency(4)
///     .extension_interval(Duration::from_secs(20))
///     .on_completed(|input: &Job, output: &Report| println!("{input:?} -> {output:?}"))
///     .build()?;
/// ```
///
/// Without an explicit strategy the [`DefaultErrorHandlingStrategy`] is used,
/// without a callback a [`NoopCallback`].
pub struct MessageHandlerBuilder<I, O> {
    queue: QueueDescriptor,
    transport: Arc<dyn QueueTransport>,
    scheduler: Arc<LeaseScheduler>,
    worker: Arc<dyn MessageWorker<I, O>>,
    concurrency: usize,
    batch_size: usize,
    extension_interval: Duration,
    shutdown_grace: Duration,
    retry: RetryPolicy,
    strategy: Option<Arc<dyn ErrorHandlingStrategy<I>>>,
    callback: Option<Arc<dyn CompletionCallback<I, O>>>,
}

impl<I, O> MessageHandlerBuilder<I, O>
where
    I: fmt::Debug + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(
        queue: QueueDescriptor,
        transport: Arc<dyn QueueTransport>,
        scheduler: Arc<LeaseScheduler>,
        worker: impl MessageWorker<I, O> + 'static,
    ) -> Self {
        Self {
            queue,
            transport,
            scheduler,
            worker: Arc::new(worker),
            concurrency: 0,
            batch_size: 0,
            extension_interval: Duration::ZERO,
            shutdown_grace: Duration::ZERO,
            retry: RetryPolicy::default(),
            strategy: None,
            callback: None,
        }
        .with_config(&HandlerConfig::default())
    }

    /// Take every tunable from `config`.
    pub fn with_config(mut self, config: &HandlerConfig) -> Self {
        self.concurrency = config.concurrency;
        self.batch_size = config.batch_size;
        self.extension_interval = config.extension_interval();
        self.shutdown_grace = config.shutdown_grace();
        self.retry = config.retry.clone();
        self
    }

    /// Number of messages processed in parallel.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Messages the transport returns per fetch; the worker pool queues
    /// `batch_size - 1` admitted messages on top of the running ones.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Time between two lease renewals. Each renewal resets the lease to the
    /// queue's default duration.
    pub fn extension_interval(mut self, interval: Duration) -> Self {
        self.extension_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn error_strategy(mut self, strategy: impl ErrorHandlingStrategy<I> + 'static) -> Self {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    pub fn on_completed(mut self, callback: impl CompletionCallback<I, O> + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(LeaseholdError::InvalidConfig(
                "concurrency has to be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(LeaseholdError::InvalidConfig(
                "batch size has to be > 0".to_string(),
            ));
        }
        if self.extension_interval.is_zero() {
            return Err(LeaseholdError::InvalidConfig(
                "the extension interval has to be > 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(LeaseholdError::InvalidConfig(
                "lease renewal needs at least one attempt".to_string(),
            ));
        }
        let default_lease = self.queue.default_lease();
        let too_close = default_lease
            .checked_sub(LEASE_SAFETY_MARGIN)
            .is_none_or(|limit| self.extension_interval > limit);
        if too_close {
            return Err(LeaseholdError::InvalidConfig(format!(
                "the extension interval of {}s is too close to the default lease of {}s \
                 of queue {}, has to be at least {}s less",
                self.extension_interval.as_secs_f64(),
                default_lease.as_secs_f64(),
                self.queue.name(),
                LEASE_SAFETY_MARGIN.as_secs(),
            )));
        }
        Ok(())
    }

    /// Validate and start the handler's worker pool.
    ///
    /// Needs a running tokio runtime.
    pub fn build(self) -> Result<MessageHandler<I, O>> {
        self.validate()?;

        // batch_size - 1 wait behind the running ones, and every admitted
        // message must fit: the in-flight set already caps the total
        let queue_capacity = self.batch_size.saturating_sub(1).max(self.concurrency);
        let pool = WorkerPool::spawn(
            format!("handler-{}", self.queue.name()),
            self.concurrency,
            queue_capacity,
        )?;

        Ok(MessageHandler::from_parts(HandlerParts {
            in_flight: Arc::new(InFlightSet::new(self.concurrency)),
            pool,
            queue: self.queue,
            transport: self.transport,
            scheduler: self.scheduler,
            worker: self.worker,
            callback: self.callback.unwrap_or_else(|| Arc::new(NoopCallback)),
            strategy: self
                .strategy
                .unwrap_or_else(|| Arc::new(DefaultErrorHandlingStrategy)),
            retry: self.retry,
            extension_interval: self.extension_interval,
            shutdown_grace: self.shutdown_grace,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Message, QueueName};
    use crate::error::WorkerError;
    use crate::impls::InMemoryTransport;
    use async_trait::async_trait;
    use rstest::rstest;

    struct Echo;

    #[async_trait]
    impl MessageWorker<String, String> for Echo {
        async fn work(&self, message: &Message<String>) -> std::result::Result<String, WorkerError> {
            Ok(message.payload().clone())
        }
    }

    fn builder(default_lease: Duration) -> MessageHandlerBuilder<String, String> {
        let queue = QueueDescriptor::new(QueueName::from("jobs"), "memory://queues/jobs", default_lease);
        MessageHandlerBuilder::new(
            queue,
            Arc::new(InMemoryTransport::new()),
            Arc::new(LeaseScheduler::new()),
            Echo,
        )
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let handler = builder(Duration::from_secs(30)).build().unwrap();
        let stats = handler.stats();
        assert_eq!(stats.max_in_flight, 1);
        assert_eq!(stats.queue_capacity, 9);
        assert_eq!(handler.remaining_queue_capacity(), 9);
        assert_eq!(handler.free_worker_capacity(), 1);
    }

    #[tokio::test]
    async fn queue_holds_at_least_one_task_per_worker() {
        let handler = builder(Duration::from_secs(30)).batch_size(1).build().unwrap();
        assert_eq!(handler.stats().queue_capacity, 1);

        let handler = builder(Duration::from_secs(30))
            .concurrency(4)
            .batch_size(2)
            .build()
            .unwrap();
        assert_eq!(handler.stats().queue_capacity, 4);
    }

    #[rstest]
    #[case::exactly_five_seconds_less(30, 25, true)]
    #[case::too_close(30, 26, false)]
    #[case::lease_shorter_than_margin(4, 1, false)]
    #[case::equal_to_lease(20, 20, false)]
    #[tokio::test]
    async fn interval_must_leave_margin(
        #[case] lease_secs: u64,
        #[case] interval_secs: u64,
        #[case] ok: bool,
    ) {
        let result = builder(Duration::from_secs(lease_secs))
            .extension_interval(Duration::from_secs(interval_secs))
            .build();
        assert_eq!(result.is_ok(), ok);
        if let Err(err) = result {
            assert!(matches!(err, LeaseholdError::InvalidConfig(ref msg) if msg.contains("too close")));
        }
    }

    #[rstest]
    #[case::no_workers(builder(Duration::from_secs(30)).concurrency(0))]
    #[case::no_batch(builder(Duration::from_secs(30)).batch_size(0))]
    #[case::no_interval(builder(Duration::from_secs(30)).extension_interval(Duration::ZERO))]
    #[case::no_attempts(builder(Duration::from_secs(30)).retry_policy(RetryPolicy::fixed(Duration::from_secs(1), 0)))]
    #[tokio::test]
    async fn rejects_zero_settings(#[case] builder: MessageHandlerBuilder<String, String>) {
        assert!(matches!(builder.build(), Err(LeaseholdError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn with_config_applies_every_field() {
        let config = HandlerConfig::from_toml_str(
            "concurrency = 3\nbatch_size = 4\nextension_interval_secs = 5\n",
        )
        .unwrap();
        let handler = builder(Duration::from_secs(30)).with_config(&config).build().unwrap();
        let stats = handler.stats();
        assert_eq!(stats.max_in_flight, 3);
        assert_eq!(stats.queue_capacity, 3);
    }

    #[test]
    fn build_needs_a_runtime() {
        let err = builder(Duration::from_secs(30)).build().err().unwrap();
        assert!(matches!(err, LeaseholdError::InvalidConfig(_)));
    }
}
