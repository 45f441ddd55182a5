//! TrackedMessage - a message plus its "already acknowledged" flag.
//!
//! Shared (behind an `Arc`) by the message task and the lease extender of
//! one admitted message.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::{Message, MessageId, QueueDescriptor};
use crate::error::TransportError;
use crate::ports::QueueTransport;

pub struct TrackedMessage<I> {
    message: Message<I>,
    acknowledged: AtomicBool,
}

impl<I> TrackedMessage<I> {
    pub fn new(message: Message<I>) -> Self {
        Self {
            message,
            acknowledged: AtomicBool::new(false),
        }
    }

    pub fn message(&self) -> &Message<I> {
        &self.message
    }

    pub fn id(&self) -> &MessageId {
        self.message.id()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Acknowledge at the transport. A second call after success is a no-op.
    pub async fn acknowledge(&self) -> Result<(), TransportError> {
        if self.is_acknowledged() {
            return Ok(());
        }
        self.message.ack().await?;
        self.acknowledged.store(true, Ordering::Release);
        Ok(())
    }

    /// Reset the lease to the queue's default duration.
    ///
    /// Returns `false` without calling the transport once the message has
    /// been acknowledged.
    pub async fn extend_lease(
        &self,
        transport: &dyn QueueTransport,
        queue: &QueueDescriptor,
    ) -> Result<bool, TransportError> {
        if self.is_acknowledged() {
            return Ok(false);
        }
        transport
            .extend_lease(queue, self.message.receipt_handle(), queue.default_lease())
            .await?;
        Ok(true)
    }
}
