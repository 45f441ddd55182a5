//! InMemoryTransport - a lease-based queue living in process memory.
//!
//! Used by tests and the demo CLI. Behaves like the real thing where the
//! engine can tell: receipts are per delivery, unacknowledged messages come
//! back once their lease lapses, acknowledging twice is harmless, and
//! renewing the lease of an acknowledged message fails.
//!
//! Failures can be scripted, and every lease call is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::{Message, MessageId, QueueDescriptor, QueueName, ReceiptHandle};
use crate::error::TransportError;
use crate::ports::{Acknowledger, QueueTransport};

type ExtensionHook = Box<dyn FnOnce() + Send>;

struct Stored {
    id: MessageId,
    body: String,
    receive_count: u32,
}

struct Leased {
    message: Stored,
    deadline: Instant,
}

struct MemoryQueue {
    descriptor: QueueDescriptor,
    ready: VecDeque<Stored>,
    leased: HashMap<ReceiptHandle, Leased>,
}

impl MemoryQueue {
    /// Put messages whose lease lapsed back in front of the ready queue.
    fn requeue_lapsed(&mut self, now: Instant) {
        let lapsed: Vec<ReceiptHandle> = self
            .leased
            .iter()
            .filter(|(_, leased)| leased.deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in lapsed {
            if let Some(leased) = self.leased.remove(&receipt) {
                self.ready.push_front(leased.message);
            }
        }
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<QueueName, MemoryQueue>,
    extension_failures: VecDeque<TransportError>,
    ack_failures: VecDeque<TransportError>,
    extension_hook: Option<ExtensionHook>,
    extension_delay: Option<Duration>,
    extension_attempts: usize,
    extensions: Vec<(ReceiptHandle, Duration)>,
    ack_attempts: usize,
    acknowledged: Vec<MessageId>,
}

/// In-memory queue transport. Cloning shares the same queues.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create (or replace) a queue with the given visibility timeout.
    pub fn create_queue(&self, name: QueueName, default_lease: Duration) -> QueueDescriptor {
        let descriptor = QueueDescriptor::new(
            name.clone(),
            format!("memory://queues/{name}"),
            default_lease,
        );
        self.state().queues.insert(
            name,
            MemoryQueue {
                descriptor: descriptor.clone(),
                ready: VecDeque::new(),
                leased: HashMap::new(),
            },
        );
        descriptor
    }

    /// Enqueue a body under a fresh message id. Unknown queues are ignored
    /// and the id is still returned.
    pub fn send(&self, queue: &QueueName, body: impl Into<String>) -> MessageId {
        let id = MessageId::generate();
        self.send_with_id(queue, id.clone(), body);
        id
    }

    /// Enqueue with a caller-chosen id, e.g. to simulate duplicate delivery.
    pub fn send_with_id(&self, queue: &QueueName, id: MessageId, body: impl Into<String>) {
        if let Some(q) = self.state().queues.get_mut(queue) {
            q.ready.push_back(Stored {
                id,
                body: body.into(),
                receive_count: 0,
            });
        }
    }

    /// Lease up to `max` messages.
    pub fn receive(&self, queue: &QueueName, max: usize) -> Vec<Message<String>> {
        let now = Instant::now();
        let mut delivered = Vec::new();
        {
            let mut state = self.state();
            let Some(q) = state.queues.get_mut(queue) else {
                return Vec::new();
            };
            q.requeue_lapsed(now);
            let deadline = now + q.descriptor.default_lease();
            while delivered.len() < max {
                let Some(mut stored) = q.ready.pop_front() else {
                    break;
                };
                stored.receive_count += 1;
                let receipt = ReceiptHandle::generate();
                delivered.push((
                    stored.id.clone(),
                    receipt.clone(),
                    stored.body.clone(),
                    stored.receive_count,
                ));
                q.leased.insert(
                    receipt,
                    Leased {
                        message: stored,
                        deadline,
                    },
                );
            }
        }

        let acknowledger: Arc<dyn Acknowledger> = Arc::new(self.clone());
        delivered
            .into_iter()
            .map(|(id, receipt, body, receive_count)| {
                Message::new(id, receipt, body, Arc::clone(&acknowledger))
                    .with_attribute("ApproximateReceiveCount", receive_count.to_string())
            })
            .collect()
    }

    /// Fail the next lease renewals with these errors, in order.
    pub fn fail_next_extensions(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().extension_failures.extend(errors);
    }

    /// Fail the next acknowledgments with these errors, in order.
    pub fn fail_next_acks(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.state().ack_failures.extend(errors);
    }

    /// Run `hook` when the next renewal call starts.
    pub fn on_next_extension(&self, hook: impl FnOnce() + Send + 'static) {
        self.state().extension_hook = Some(Box::new(hook));
    }

    /// Make every renewal call take `delay` before touching the queue.
    pub fn delay_extensions(&self, delay: Duration) {
        self.state().extension_delay = Some(delay);
    }

    /// Successful renewals: (receipt, lease it was reset to).
    pub fn lease_extensions(&self) -> Vec<(ReceiptHandle, Duration)> {
        self.state().extensions.clone()
    }

    /// Renewal calls, failed ones included.
    pub fn extension_attempts(&self) -> usize {
        self.state().extension_attempts
    }

    pub fn ack_attempts(&self) -> usize {
        self.state().ack_attempts
    }

    pub fn acknowledged(&self) -> Vec<MessageId> {
        self.state().acknowledged.clone()
    }

    pub fn is_acknowledged(&self, id: &MessageId) -> bool {
        self.state().acknowledged.contains(id)
    }

    /// Messages waiting to be received (lapsed leases included).
    pub fn visible(&self, queue: &QueueName) -> usize {
        let now = Instant::now();
        let mut state = self.state();
        state
            .queues
            .get_mut(queue)
            .map(|q| {
                q.requeue_lapsed(now);
                q.ready.len()
            })
            .unwrap_or(0)
    }

    /// Messages currently leased to a consumer.
    pub fn leased(&self, queue: &QueueName) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.leased.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn fetch_queue_descriptor(
        &self,
        name: &QueueName,
    ) -> Result<QueueDescriptor, TransportError> {
        self.state()
            .queues
            .get(name)
            .map(|q| q.descriptor.clone())
            .ok_or_else(|| TransportError::Permanent(format!("queue does not exist: {name}")))
    }

    async fn extend_lease(
        &self,
        queue: &QueueDescriptor,
        receipt: &ReceiptHandle,
        lease: Duration,
    ) -> Result<(), TransportError> {
        let (hook, delay) = {
            let mut state = self.state();
            state.extension_attempts += 1;
            (state.extension_hook.take(), state.extension_delay)
        };
        if let Some(hook) = hook {
            hook();
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(err) = state.extension_failures.pop_front() {
            return Err(err);
        }
        let leased = state
            .queues
            .get_mut(queue.name())
            .and_then(|q| q.leased.get_mut(receipt))
            .ok_or_else(|| {
                TransportError::Permanent(format!("receipt handle {receipt} is not in flight"))
            })?;
        leased.deadline = Instant::now() + lease;
        state.extensions.push((receipt.clone(), lease));
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for InMemoryTransport {
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        let mut state = self.state();
        state.ack_attempts += 1;
        if let Some(err) = state.ack_failures.pop_front() {
            return Err(err);
        }
        let removed = state
            .queues
            .values_mut()
            .find_map(|q| q.leased.remove(receipt));
        if let Some(leased) = removed {
            state.acknowledged.push(leased.message.id);
        }
        Ok(())
    }
}
