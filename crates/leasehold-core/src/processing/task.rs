//! MessageTask - runs one admitted message through the worker.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::{ErrorHandlingStrategy, InFlightSet, TrackedMessage};
use crate::domain::{MessageId, Settlement, TaskOutcome};
use crate::error::{StrategyError, WorkerError};
use crate::lease::LeaseHandle;
use crate::observability::{Counter, HandlerCounters};
use crate::ports::{CompletionCallback, MessageWorker};
use crate::signal;

/// Releases an admitted message: cancels its lease extender and frees its
/// in-flight slot. Runs on drop, so it also covers tasks that are discarded
/// without ever running.
pub struct SettleGuard {
    in_flight: Arc<InFlightSet<MessageId>>,
    id: MessageId,
    lease: Option<LeaseHandle>,
}

impl SettleGuard {
    pub fn new(in_flight: Arc<InFlightSet<MessageId>>, id: MessageId) -> Self {
        Self {
            in_flight,
            id,
            lease: None,
        }
    }

    pub fn attach_lease(&mut self, lease: LeaseHandle) {
        self.lease = Some(lease);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.cancel();
        }
        self.in_flight.remove(&self.id);
    }
}

/// The unit of work for one message.
///
/// Settles exactly once: worker, completion callback, acknowledgment, then
/// (always) lease cancellation and in-flight removal via [`SettleGuard`].
pub struct MessageTask<I, O> {
    message: Arc<TrackedMessage<I>>,
    worker: Arc<dyn MessageWorker<I, O>>,
    callback: Arc<dyn CompletionCallback<I, O>>,
    strategy: Arc<dyn ErrorHandlingStrategy<I>>,
    counters: Arc<HandlerCounters>,
    guard: SettleGuard,
}

impl<I, O> MessageTask<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(
        message: Arc<TrackedMessage<I>>,
        worker: Arc<dyn MessageWorker<I, O>>,
        callback: Arc<dyn CompletionCallback<I, O>>,
        strategy: Arc<dyn ErrorHandlingStrategy<I>>,
        counters: Arc<HandlerCounters>,
        guard: SettleGuard,
    ) -> Self {
        Self {
            message,
            worker,
            callback,
            strategy,
            counters,
            guard,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        self.message.id()
    }

    /// Run the task. `interrupt` is the pool's cooperative cancel signal.
    ///
    /// `Err` means the strategy propagated a failure; the message is then
    /// left unacknowledged (or its acknowledgment failure is escalated).
    pub async fn run(self, interrupt: watch::Receiver<bool>) -> Result<Settlement, StrategyError> {
        info!(message_id = %self.message_id(), "starting processing of message");
        let outcome = self.execute(interrupt).await;
        let settled = self.settle(outcome).await;
        drop(self.guard);
        settled
    }

    async fn execute(&self, mut interrupt: watch::Receiver<bool>) -> TaskOutcome<O> {
        if *interrupt.borrow() {
            return TaskOutcome::Aborted;
        }

        // own task, so a panic surfaces as a JoinError instead of unwinding here
        let worker = Arc::clone(&self.worker);
        let message = Arc::clone(&self.message);
        let mut work = AbortOnDrop(tokio::spawn(async move { worker.work(message.message()).await }));

        let joined = tokio::select! {
            joined = &mut work.0 => joined,
            _ = signal::raised(&mut interrupt) => {
                work.0.abort();
                // let a worker that already finished report its result
                match (&mut work.0).await {
                    Ok(result) => Ok(result),
                    Err(_) => return TaskOutcome::Aborted,
                }
            }
        };

        match joined {
            Ok(result) => TaskOutcome::from_result(result),
            Err(err) if err.is_panic() => {
                TaskOutcome::Fatal(WorkerError::Fatal(panic_message(err.into_panic())))
            }
            Err(_) => TaskOutcome::Aborted,
        }
    }

    async fn settle(&self, outcome: TaskOutcome<O>) -> Result<Settlement, StrategyError> {
        let message = self.message.message();
        match outcome {
            TaskOutcome::Processed(output) => {
                self.callback.on_completed(message.payload(), &output);
                self.counters.incr(Counter::Processed);
                let settlement = self.acknowledge(Settlement::Processed).await?;
                if settlement == Settlement::Processed {
                    info!(
                        message_id = %self.message_id(),
                        "message successfully processed and acknowledged"
                    );
                }
                Ok(settlement)
            }
            TaskOutcome::Aborted => {
                self.counters.incr(Counter::Aborted);
                info!(message_id = %self.message_id(), "got interrupted, did not finish");
                Ok(Settlement::Aborted)
            }
            TaskOutcome::Failed(err) => {
                self.counters.incr(Counter::Failed);
                if let Err(rejected) = self.strategy.handle_worker_error(&err, message) {
                    self.counters.incr(Counter::Rejected);
                    return Err(rejected);
                }
                self.acknowledge(Settlement::Consumed).await
            }
            TaskOutcome::Fatal(err) => {
                self.counters.incr(Counter::Fatal);
                if let Err(rejected) = self.strategy.handle_worker_fatal(&err, message) {
                    self.counters.incr(Counter::Rejected);
                    return Err(rejected);
                }
                self.acknowledge(Settlement::Consumed).await
            }
        }
    }

    async fn acknowledge(&self, settled: Settlement) -> Result<Settlement, StrategyError> {
        match self.message.acknowledge().await {
            Ok(()) => Ok(settled),
            Err(err) => {
                self.counters.incr(Counter::AckFailure);
                self.strategy
                    .handle_ack_failure(&err, self.message.message())?;
                Ok(Settlement::AckFailed)
            }
        }
    }
}

/// Aborts the worker when the message task itself is cancelled.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {msg}")
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Message, QueueName};
    use crate::error::TransportError;
    use crate::impls::InMemoryTransport;
    use crate::ports::NoopCallback;
    use crate::processing::{DefaultErrorHandlingStrategy, LogAndConsumeStrategy};
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Fatal,
        Panic,
        Interrupted,
        Hang,
    }

    struct ScriptedWorker(Behaviour);

    #[async_trait]
    impl MessageWorker<String, usize> for ScriptedWorker {
        async fn work(&self, message: &Message<String>) -> Result<usize, WorkerError> {
            match self.0 {
                Behaviour::Succeed => Ok(message.payload().len()),
                Behaviour::Fail => Err(WorkerError::failed("IllegalArgument")),
                Behaviour::Fatal => Err(WorkerError::fatal("out of memory")),
                Behaviour::Panic => panic!("worker blew up"),
                Behaviour::Interrupted => Err(WorkerError::Interrupted),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct Fixture {
        transport: Arc<InMemoryTransport>,
        in_flight: Arc<InFlightSet<MessageId>>,
        counters: Arc<HandlerCounters>,
        message: Arc<TrackedMessage<String>>,
    }

    impl Fixture {
        fn new() -> Self {
            let transport = Arc::new(InMemoryTransport::new());
            let name = QueueName::from("jobs");
            transport.create_queue(name.clone(), Duration::from_secs(30));
            transport.send(&name, "hello");
            let message = transport.receive(&name, 1).pop().expect("one message");
            let in_flight = Arc::new(InFlightSet::new(4));
            in_flight.insert(message.id().clone());
            Self {
                transport,
                in_flight,
                counters: Arc::new(HandlerCounters::default()),
                message: Arc::new(TrackedMessage::new(message)),
            }
        }

        fn task(
            &self,
            behaviour: Behaviour,
            strategy: Arc<dyn ErrorHandlingStrategy<String>>,
            callback: Arc<dyn CompletionCallback<String, usize>>,
        ) -> MessageTask<String, usize> {
            let guard = SettleGuard::new(Arc::clone(&self.in_flight), self.message.id().clone());
            MessageTask::new(
                Arc::clone(&self.message),
                Arc::new(ScriptedWorker(behaviour)),
                callback,
                strategy,
                Arc::clone(&self.counters),
                guard,
            )
        }

        fn id(&self) -> &MessageId {
            self.message.id()
        }
    }

    fn not_interrupted() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn success_calls_back_then_acknowledges() {
        let f = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback = {
            let seen = Arc::clone(&seen);
            move |input: &String, output: &usize| {
                seen.lock().unwrap().push((input.clone(), *output));
            }
        };
        let task = f.task(
            Behaviour::Succeed,
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::new(callback),
        );
        let (_tx, rx) = not_interrupted();

        let settled = task.run(rx).await.unwrap();

        assert_eq!(settled, Settlement::Processed);
        assert_eq!(*seen.lock().unwrap(), vec![("hello".to_string(), 5)]);
        assert!(f.transport.is_acknowledged(f.id()));
        assert!(f.in_flight.is_empty());
    }

    #[tokio::test]
    async fn default_strategy_leaves_failed_message_unacknowledged() {
        let f = Fixture::new();
        let task = f.task(
            Behaviour::Fail,
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::new(NoopCallback),
        );
        let (_tx, rx) = not_interrupted();

        let err = task.run(rx).await.unwrap_err();

        assert_eq!(err.reason, "IllegalArgument");
        assert_eq!(f.transport.ack_attempts(), 0);
        assert!(!f.in_flight.contains(f.id()));
        assert_eq!(f.counters.get(Counter::Rejected), 1);
    }

    #[tokio::test]
    async fn swallowed_failure_still_acknowledges() {
        let f = Fixture::new();
        let task = f.task(
            Behaviour::Fail,
            Arc::new(LogAndConsumeStrategy),
            Arc::new(NoopCallback),
        );
        let (_tx, rx) = not_interrupted();

        assert_eq!(task.run(rx).await.unwrap(), Settlement::Consumed);
        assert!(f.transport.is_acknowledged(f.id()));
    }

    #[tokio::test]
    async fn panic_is_routed_as_fatal() {
        let f = Fixture::new();
        let task = f.task(
            Behaviour::Panic,
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::new(NoopCallback),
        );
        let (_tx, rx) = not_interrupted();

        let err = task.run(rx).await.unwrap_err();

        assert!(err.reason.contains("worker blew up"));
        assert_eq!(f.counters.get(Counter::Fatal), 1);
        assert!(f.in_flight.is_empty());
    }

    #[tokio::test]
    async fn interruption_is_a_clean_abort() {
        let f = Fixture::new();
        let task = f.task(
            Behaviour::Hang,
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::new(NoopCallback),
        );
        let (tx, rx) = not_interrupted();

        let running = tokio::spawn(task.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.in_flight.contains(f.id()));
        tx.send(true).unwrap();

        let settled = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(settled, Settlement::Aborted);
        assert_eq!(f.transport.ack_attempts(), 0);
        assert_eq!(f.counters.get(Counter::Rejected), 0);
        assert!(f.in_flight.is_empty());
    }

    #[tokio::test]
    async fn ack_failure_is_logged_not_raised_by_default() {
        let f = Fixture::new();
        f.transport
            .fail_next_acks([TransportError::Permanent("delete failed".into())]);
        let task = f.task(
            Behaviour::Succeed,
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::new(NoopCallback),
        );
        let (_tx, rx) = not_interrupted();

        assert_eq!(task.run(rx).await.unwrap(), Settlement::AckFailed);
        assert_eq!(f.counters.get(Counter::AckFailure), 1);
        assert!(f.in_flight.is_empty());
    }

    #[rstest]
    #[case::success(Behaviour::Succeed)]
    #[case::recoverable(Behaviour::Fail)]
    #[case::fatal(Behaviour::Fatal)]
    #[case::panic(Behaviour::Panic)]
    #[case::interrupted(Behaviour::Interrupted)]
    #[tokio::test(start_paused = true)]
    async fn always_cleans_up(#[case] behaviour: Behaviour) {
        let f = Fixture::new();
        let scheduler = crate::lease::LeaseScheduler::new();
        let queue = Arc::new(f.transport.create_queue(QueueName::from("other"), Duration::from_secs(30)));
        let extender = crate::lease::LeaseExtender::new(
            Arc::clone(&f.message),
            queue,
            f.transport.clone(),
            Arc::new(DefaultErrorHandlingStrategy),
            crate::lease::RetryPolicy::default(),
            Arc::clone(&f.counters),
        );
        let lease = scheduler.schedule(extender, Duration::from_secs(10)).unwrap();

        let mut guard = SettleGuard::new(Arc::clone(&f.in_flight), f.id().clone());
        guard.attach_lease(lease);
        let task = MessageTask::new(
            Arc::clone(&f.message),
            Arc::new(ScriptedWorker(behaviour)),
            Arc::new(NoopCallback),
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::clone(&f.counters),
            guard,
        );
        let (_tx, rx) = not_interrupted();

        let _ = task.run(rx).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!f.in_flight.contains(f.id()));
        assert_eq!(scheduler.active(), 0);
        assert_eq!(f.transport.extension_attempts(), 0);
    }

    #[tokio::test]
    async fn dropping_an_unrun_task_releases_the_slot() {
        let f = Fixture::new();
        let task = f.task(
            Behaviour::Succeed,
            Arc::new(DefaultErrorHandlingStrategy),
            Arc::new(NoopCallback),
        );
        drop(task);
        assert!(f.in_flight.is_empty());
    }
}
