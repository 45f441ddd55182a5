//! HandlerFactory - creates handlers that share one transport and one
//! lease scheduler.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::MessageHandlerBuilder;
use crate::domain::{QueueDescriptor, QueueName};
use crate::error::{LeaseholdError, Result, TransportError};
use crate::lease::LeaseScheduler;
use crate::ports::{MessageWorker, QueueTransport};

/// Messages per fetch when the host does not say otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 10;

pub struct HandlerFactory {
    transport: Arc<dyn QueueTransport>,
    scheduler: Arc<LeaseScheduler>,
    batch_size: usize,
}

impl HandlerFactory {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            scheduler: Arc::new(LeaseScheduler::new()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Batch size the host's fetch loop uses; handed to every builder.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn scheduler(&self) -> &Arc<LeaseScheduler> {
        &self.scheduler
    }

    pub async fn queue(&self, name: &QueueName) -> Result<QueueDescriptor> {
        self.transport
            .fetch_queue_descriptor(name)
            .await
            .map_err(|err| match err {
                TransportError::Permanent(_) => LeaseholdError::QueueNotFound(name.clone()),
                transient => LeaseholdError::Transport(transient),
            })
    }

    /// Look up `queue` and return a builder wired to this factory's
    /// transport, scheduler and batch size.
    pub async fn handler<I, O>(
        &self,
        queue: &QueueName,
        worker: impl MessageWorker<I, O> + 'static,
    ) -> Result<MessageHandlerBuilder<I, O>>
    where
        I: fmt::Debug + Send + Sync + 'static,
        O: Send + 'static,
    {
        let descriptor = self.queue(queue).await?;
        info!(
            queue = %descriptor.name(),
            url = descriptor.url(),
            default_lease_secs = descriptor.default_lease().as_secs(),
            "creating message handler"
        );
        Ok(MessageHandlerBuilder::new(
            descriptor,
            Arc::clone(&self.transport),
            Arc::clone(&self.scheduler),
            worker,
        )
        .batch_size(self.batch_size))
    }

    /// Stop the shared scheduler. Handlers are owned and closed by the host.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Message;
    use crate::error::WorkerError;
    use crate::impls::InMemoryTransport;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Len;

    #[async_trait]
    impl MessageWorker<String, usize> for Len {
        async fn work(&self, message: &Message<String>) -> std::result::Result<usize, WorkerError> {
            Ok(message.payload().len())
        }
    }

    #[tokio::test]
    async fn builds_handlers_for_known_queues() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.create_queue(QueueName::from("jobs"), Duration::from_secs(60));
        let factory = HandlerFactory::new(transport.clone()).with_batch_size(4);

        let handler = factory
            .handler(&QueueName::from("jobs"), Len)
            .await
            .unwrap()
            .extension_interval(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(handler.queue().default_lease(), Duration::from_secs(60));
        assert_eq!(handler.stats().queue_capacity, 3);
    }

    #[tokio::test]
    async fn unknown_queue_is_reported_by_name() {
        let factory = HandlerFactory::new(Arc::new(InMemoryTransport::new()));
        let err = factory
            .handler(&QueueName::from("missing"), Len)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LeaseholdError::QueueNotFound(name) if name.as_str() == "missing"));
    }

    #[tokio::test]
    async fn handlers_share_the_scheduler() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.create_queue(QueueName::from("a"), Duration::from_secs(30));
        let factory = HandlerFactory::new(transport.clone());
        let handler = factory
            .handler(&QueueName::from("a"), Len)
            .await
            .unwrap()
            .build()
            .unwrap();

        factory.shutdown();
        assert!(factory.scheduler().is_shut_down());

        transport.send(&QueueName::from("a"), "late");
        let msg = transport.receive(&QueueName::from("a"), 1).pop().unwrap();
        let err = handler.handle_message(msg).await.unwrap_err();
        assert!(matches!(err, LeaseholdError::LeaseScheduling(_, _)));
    }
}
