//! LeaseScheduler - fires lease extender ticks at a fixed rate.
//!
//! One scheduler can serve many handlers. Every scheduled extender runs in
//! its own tokio task until its handle is cancelled, the scheduler shuts
//! down, or the strategy asks it to stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::LeaseExtender;
use crate::error::{LeaseholdError, Result};
use crate::signal;

pub struct LeaseScheduler {
    closed: AtomicBool,
    active: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
}

impl LeaseScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            closed: AtomicBool::new(false),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Start renewing at `interval`; the first tick fires after one interval.
    ///
    /// Fails synchronously when the scheduler is shut down or no tokio
    /// runtime is available.
    pub fn schedule<I>(&self, extender: LeaseExtender<I>, interval: Duration) -> Result<LeaseHandle>
    where
        I: Send + Sync + 'static,
    {
        let message_id = extender.message_id().clone();
        if self.is_shut_down() {
            return Err(LeaseholdError::LeaseScheduling(
                message_id,
                "lease scheduler is shut down".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(LeaseholdError::LeaseScheduling(
                message_id,
                "extension interval must be > 0".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LeaseholdError::LeaseScheduling(message_id, e.to_string()))?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let active = ActiveLease::new(Arc::clone(&self.active));

        let join = runtime.spawn(async move {
            let _active = active;
            run_extender(extender, interval, cancel_rx, shutdown_rx).await;
        });

        Ok(LeaseHandle { cancel_tx, join })
    }

    /// Number of extenders currently scheduled.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject new extenders and stop all running ones after their current tick.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // ignore send error: no extender may be subscribed
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for LeaseScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_extender<I>(
    extender: LeaseExtender<I>,
    interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // not selected while a renewal runs: cancellation takes effect at the next tick
        tokio::select! {
            biased;
            _ = signal::raised(&mut cancel_rx) => break,
            _ = signal::raised(&mut shutdown_rx) => break,
            _ = ticker.tick() => {}
        }

        if let Err(err) = extender.extend().await {
            warn!(
                message_id = %extender.message_id(),
                error = %err,
                "stopping lease extension"
            );
            break;
        }
    }
    debug!(message_id = %extender.message_id(), "lease extender finished");
}

/// Decrements the active count when the extender task ends, however it ends.
struct ActiveLease(Arc<AtomicUsize>);

impl ActiveLease {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self(active)
    }
}

impl Drop for ActiveLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to one scheduled extender. Dropping it cancels the extender too.
#[derive(Debug)]
pub struct LeaseHandle {
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LeaseHandle {
    /// Suppress future ticks. A renewal already in progress is allowed to finish.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueDescriptor, QueueName};
    use crate::error::TransportError;
    use crate::impls::InMemoryTransport;
    use crate::lease::RetryPolicy;
    use crate::observability::HandlerCounters;
    use crate::processing::{DefaultErrorHandlingStrategy, TrackedMessage};

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        queue: Arc<QueueDescriptor>,
    }

    impl Fixture {
        fn new() -> Self {
            let transport = Arc::new(InMemoryTransport::new());
            let queue = transport.create_queue(QueueName::from("jobs"), Duration::from_secs(30));
            Self {
                transport,
                queue: Arc::new(queue),
            }
        }

        fn extender(&self) -> (LeaseExtender<String>, Arc<TrackedMessage<String>>) {
            self.transport.send(self.queue.name(), "payload");
            let message = self
                .transport
                .receive(self.queue.name(), 1)
                .pop()
                .expect("message was just sent");
            let tracked = Arc::new(TrackedMessage::new(message));
            let extender = LeaseExtender::new(
                Arc::clone(&tracked),
                Arc::clone(&self.queue),
                self.transport.clone(),
                Arc::new(DefaultErrorHandlingStrategy),
                RetryPolicy::default(),
                Arc::new(HandlerCounters::default()),
            );
            (extender, tracked)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_rate_until_cancelled() {
        let f = Fixture::new();
        let scheduler = LeaseScheduler::new();
        let (extender, _) = f.extender();

        let handle = scheduler
            .schedule(extender, Duration::from_secs(10))
            .unwrap();
        assert_eq!(scheduler.active(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.transport.extension_attempts(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.transport.lease_extensions().len(), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.transport.lease_extensions().len(), 3);
        assert!(handle.is_finished());
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_the_running_renewal_finish() {
        let f = Fixture::new();
        let scheduler = LeaseScheduler::new();
        let (extender, _) = f.extender();
        f.transport.delay_extensions(Duration::from_secs(2));

        let handle = scheduler
            .schedule(extender, Duration::from_secs(10))
            .unwrap();
        // the first renewal is now in progress
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(f.transport.lease_extensions().len(), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn strategy_error_stops_the_schedule() {
        let f = Fixture::new();
        let scheduler = LeaseScheduler::new();
        let (extender, _) = f.extender();
        f.transport
            .fail_next_extensions([TransportError::Permanent("access denied".into())]);

        let handle = scheduler
            .schedule(extender, Duration::from_secs(10))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(45)).await;

        assert_eq!(f.transport.extension_attempts(), 1);
        assert!(handle.is_finished());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_extenders_and_rejects_new_ones() {
        let f = Fixture::new();
        let scheduler = LeaseScheduler::new();
        let (first, _) = f.extender();
        let (second, _) = f.extender();

        let handle = scheduler.schedule(first, Duration::from_secs(10)).unwrap();
        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(handle.is_finished());
        let err = scheduler
            .schedule(second, Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, LeaseholdError::LeaseScheduling(_, _)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let f = Fixture::new();
        let scheduler = LeaseScheduler::new();
        let (extender, _) = f.extender();

        let handle = scheduler
            .schedule(extender, Duration::from_secs(10))
            .unwrap();
        drop(handle);
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(f.transport.extension_attempts(), 0);
        assert_eq!(scheduler.active(), 0);
    }
}
