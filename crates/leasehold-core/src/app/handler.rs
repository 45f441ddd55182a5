//! MessageHandler - admission control for one queue.
//!
//! Called once per delivered message by a single dispatch loop. Each
//! admitted message gets a lease extender and a task on the worker pool;
//! the call then waits until the in-flight set has room for the next one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::WorkerPool;
use crate::domain::{Message, MessageId, QueueDescriptor};
use crate::error::{LeaseholdError, Result};
use crate::lease::{LeaseExtender, LeaseScheduler, RetryPolicy};
use crate::observability::{Counter, HandlerCounters, HandlerStats};
use crate::ports::{CompletionCallback, MessageWorker, QueueTransport};
use crate::processing::{
    ErrorHandlingStrategy, InFlightSet, MessageTask, SettleGuard, TrackedMessage,
};

/// Everything the builder validated and wired.
pub(crate) struct HandlerParts<I, O> {
    pub queue: QueueDescriptor,
    pub transport: Arc<dyn QueueTransport>,
    pub scheduler: Arc<LeaseScheduler>,
    pub pool: WorkerPool<I, O>,
    pub in_flight: Arc<InFlightSet<MessageId>>,
    pub worker: Arc<dyn MessageWorker<I, O>>,
    pub callback: Arc<dyn CompletionCallback<I, O>>,
    pub strategy: Arc<dyn ErrorHandlingStrategy<I>>,
    pub retry: RetryPolicy,
    pub extension_interval: Duration,
    pub shutdown_grace: Duration,
}

pub struct MessageHandler<I, O> {
    queue: Arc<QueueDescriptor>,
    transport: Arc<dyn QueueTransport>,
    scheduler: Arc<LeaseScheduler>,
    pool: WorkerPool<I, O>,
    in_flight: Arc<InFlightSet<MessageId>>,
    worker: Arc<dyn MessageWorker<I, O>>,
    callback: Arc<dyn CompletionCallback<I, O>>,
    strategy: Arc<dyn ErrorHandlingStrategy<I>>,
    retry: RetryPolicy,
    extension_interval: Duration,
    shutdown_grace: Duration,
    counters: Arc<HandlerCounters>,
}

impl<I, O> MessageHandler<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub(crate) fn from_parts(parts: HandlerParts<I, O>) -> Self {
        Self {
            queue: Arc::new(parts.queue),
            transport: parts.transport,
            scheduler: parts.scheduler,
            pool: parts.pool,
            in_flight: parts.in_flight,
            worker: parts.worker,
            callback: parts.callback,
            strategy: parts.strategy,
            retry: parts.retry,
            extension_interval: parts.extension_interval,
            shutdown_grace: parts.shutdown_grace,
            counters: Arc::new(HandlerCounters::default()),
        }
    }

    /// Admit `message` for processing.
    ///
    /// A message whose id is already in flight is ignored. Otherwise the
    /// call returns once the message is queued for a worker *and* a worker
    /// slot is free again, so the dispatch loop can fetch the next batch.
    ///
    /// Must not be called concurrently for the same handler. An `Err` means
    /// the message was not admitted; the dispatch loop should stop.
    pub async fn handle_message(&self, message: Message<I>) -> Result<()> {
        let message_id = message.id().clone();
        if self.in_flight.contains(&message_id) {
            self.counters.incr(Counter::Duplicate);
            debug!(%message_id, "message already in flight, ignoring duplicate delivery");
            return Ok(());
        }
        if self.pool.is_shut_down() {
            return Err(LeaseholdError::TaskRejected(
                message_id,
                format!("handler for queue {} is shut down", self.queue.name()),
            ));
        }

        self.in_flight.insert(message_id.clone());
        // dropping the guard releases the slot, also on the error paths below
        let mut guard = SettleGuard::new(Arc::clone(&self.in_flight), message_id.clone());
        let message = Arc::new(TrackedMessage::new(message));

        let extender = LeaseExtender::new(
            Arc::clone(&message),
            Arc::clone(&self.queue),
            Arc::clone(&self.transport),
            Arc::clone(&self.strategy),
            self.retry.clone(),
            Arc::clone(&self.counters),
        );
        let lease = self
            .scheduler
            .schedule(extender, self.extension_interval)
            .inspect_err(|err| {
                error!(%message_id, error = %err, "error while trying to schedule lease extender");
            })?;
        guard.attach_lease(lease);

        let task = MessageTask::new(
            message,
            Arc::clone(&self.worker),
            Arc::clone(&self.callback),
            Arc::clone(&self.strategy),
            Arc::clone(&self.counters),
            guard,
        );
        self.pool.submit(task).inspect_err(|err| {
            error!(%message_id, error = %err, "error while trying to submit message task");
        })?;
        self.counters.incr(Counter::Admitted);
        debug!(%message_id, queue = %self.queue.name(), "message admitted");

        self.in_flight.wait_for_free_slot().await;
        Ok(())
    }

    /// Stop accepting messages, give running and queued tasks `grace` to
    /// finish, then interrupt them. A zero grace interrupts immediately.
    ///
    /// Returns `true` when all workers stopped within the bounds.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(queue = %self.queue.name(), in_flight = self.in_flight.len(), "shutting down message handler");
        self.pool.shutdown(grace).await
    }

    /// [`shutdown`](Self::shutdown) with the configured grace period.
    pub async fn close(&self) -> bool {
        self.shutdown(self.shutdown_grace).await
    }

    pub fn queue(&self) -> &QueueDescriptor {
        &self.queue
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_shut_down()
    }

    pub fn is_in_flight(&self, message_id: &MessageId) -> bool {
        self.in_flight.contains(message_id)
    }

    /// Messages admitted and not yet settled.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_ids(&self) -> HashSet<MessageId> {
        self.in_flight.snapshot()
    }

    /// Workers not running a task right now.
    pub fn free_worker_capacity(&self) -> usize {
        self.pool.idle()
    }

    /// Admitted tasks the pool can still queue. Advisory: only meaningful
    /// from the dispatch loop.
    pub fn remaining_queue_capacity(&self) -> usize {
        self.pool.remaining_capacity()
    }

    /// Lease extenders running on the (possibly shared) scheduler.
    pub fn active_leases(&self) -> usize {
        self.scheduler.active()
    }

    pub fn stats(&self) -> HandlerStats {
        let mut stats = HandlerStats {
            in_flight: self.in_flight.len(),
            max_in_flight: self.in_flight.max_size(),
            queued: self.pool.queued(),
            queue_capacity: self.pool.capacity(),
            active_leases: self.scheduler.active(),
            ..Default::default()
        };
        self.counters.fill(&mut stats);
        stats
    }
}
