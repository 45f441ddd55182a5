//! Transport ports - the queue service as seen by the engine.
//!
//! Fetching messages is the host's business; the engine only needs to
//! look up a queue, renew leases and acknowledge.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{QueueDescriptor, QueueName, ReceiptHandle};
use crate::error::TransportError;

/// Lease and queue operations of a lease-based queue.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Resolve a queue name into its url and default lease duration.
    async fn fetch_queue_descriptor(&self, name: &QueueName)
    -> Result<QueueDescriptor, TransportError>;

    /// Set the remaining lease of one delivery to `lease`.
    async fn extend_lease(
        &self,
        queue: &QueueDescriptor,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), TransportError>;
}

/// Acknowledgment capability attached to every message.
///
/// Acknowledging twice must be harmless: either a no-op or a
/// `TransportError::Permanent`.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), TransportError>;
}
