//! LeaseExtender - renews the lease of one in-flight message.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::RetryPolicy;
use crate::domain::{MessageId, QueueDescriptor};
use crate::error::{StrategyError, TransportError};
use crate::observability::{Counter, HandlerCounters};
use crate::ports::QueueTransport;
use crate::processing::{ErrorHandlingStrategy, TrackedMessage};

/// One recurring lease renewal, bound to one message.
///
/// Each tick resets the lease to the queue's *default* duration (not an
/// increment). Transient transport failures are retried per the retry
/// policy; the final failure goes to the strategy unless the message has
/// been acknowledged meanwhile.
pub struct LeaseExtender<I> {
    message: Arc<TrackedMessage<I>>,
    queue: Arc<QueueDescriptor>,
    transport: Arc<dyn QueueTransport>,
    strategy: Arc<dyn ErrorHandlingStrategy<I>>,
    retry: RetryPolicy,
    counters: Arc<HandlerCounters>,
}

impl<I> LeaseExtender<I> {
    pub fn new(
        message: Arc<TrackedMessage<I>>,
        queue: Arc<QueueDescriptor>,
        transport: Arc<dyn QueueTransport>,
        strategy: Arc<dyn ErrorHandlingStrategy<I>>,
        retry: RetryPolicy,
        counters: Arc<HandlerCounters>,
    ) -> Self {
        Self {
            message,
            queue,
            transport,
            strategy,
            retry,
            counters,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        self.message.id()
    }

    /// Run one tick. `Err` means the strategy wants the renewals to stop.
    pub async fn extend(&self) -> Result<(), StrategyError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            trace!(
                message_id = %self.message_id(),
                queue = %self.queue.name(),
                attempt = attempts,
                "extending message lease"
            );

            match self
                .message
                .extend_lease(self.transport.as_ref(), &self.queue)
                .await
            {
                Ok(true) => {
                    debug!(
                        message_id = %self.message_id(),
                        lease_secs = self.queue.default_lease().as_secs(),
                        "message lease extended"
                    );
                    return Ok(());
                }
                Ok(false) => return Ok(()),
                Err(err) if err.is_transient() && self.retry.should_retry(attempts) => {
                    warn!(
                        message_id = %self.message_id(),
                        attempt = attempts,
                        error = %err,
                        "transient failure while extending lease, retrying"
                    );
                    tokio::time::sleep(self.retry.wait()).await;
                }
                Err(err) => return self.report(err),
            }
        }
    }

    fn report(&self, err: TransportError) -> Result<(), StrategyError> {
        if self.message.is_acknowledged() {
            debug!(
                message_id = %self.message_id(),
                error = %err,
                "ignoring lease failure for acknowledged message"
            );
            return Ok(());
        }
        self.counters.incr(Counter::LeaseFailure);
        self.strategy
            .handle_lease_failure(&err, self.message.message())
    }
}
