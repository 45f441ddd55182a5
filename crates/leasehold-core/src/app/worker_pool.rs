//! WorkerPool - a fixed number of workers draining a bounded task queue.
//!
//! `submit` never waits: a full queue rejects the task. Shutdown first
//! stops intake and lets the queue drain for the grace period, then raises
//! the interrupt flag that running tasks observe. Tasks still running after
//! that are aborted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{LeaseholdError, Result};
use crate::processing::MessageTask;
use crate::signal;

/// How long interrupted tasks get to wind down before their workers are aborted.
pub const FORCED_SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

type TaskReceiver<I, O> = Arc<tokio::sync::Mutex<mpsc::Receiver<MessageTask<I, O>>>>;

/// The task each busy worker is running, keyed by worker index.
#[derive(Default)]
struct RunningTasks(Mutex<HashMap<usize, AbortHandle>>);

impl RunningTasks {
    fn tasks(&self) -> MutexGuard<'_, HashMap<usize, AbortHandle>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start(&self, worker_id: usize, task: AbortHandle) {
        self.tasks().insert(worker_id, task);
    }

    fn finish(&self, worker_id: usize) {
        self.tasks().remove(&worker_id);
    }

    fn len(&self) -> usize {
        self.tasks().len()
    }

    fn abort_all(&self) -> usize {
        let mut tasks = self.tasks();
        let aborted = tasks.len();
        for (_, task) in tasks.drain() {
            task.abort();
        }
        aborted
    }
}

pub struct WorkerPool<I, O> {
    name: String,
    size: usize,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<MessageTask<I, O>>>>,
    interrupt_tx: watch::Sender<bool>,
    running: Arc<RunningTasks>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<I, O> WorkerPool<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    /// Spawn `size` workers sharing a queue of `capacity` pending tasks.
    pub fn spawn(name: impl Into<String>, size: usize, capacity: usize) -> Result<Self> {
        if size == 0 || capacity == 0 {
            return Err(LeaseholdError::InvalidConfig(format!(
                "worker pool needs size > 0 and capacity > 0 (got {size} / {capacity})"
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LeaseholdError::InvalidConfig(e.to_string()))?;

        let name = name.into();
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver: TaskReceiver<I, O> = Arc::new(tokio::sync::Mutex::new(receiver));
        let (interrupt_tx, interrupt_rx) = watch::channel(false);
        let running = Arc::new(RunningTasks::default());

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let worker_name = format!("{name}-{worker_id}");
            let receiver = Arc::clone(&receiver);
            let interrupt = interrupt_rx.clone();
            let running = Arc::clone(&running);
            workers.push(runtime.spawn(async move {
                worker_loop(worker_id, worker_name, receiver, interrupt, running).await;
            }));
        }
        debug!(pool = %name, size, capacity, "worker pool started");

        Ok(Self {
            name,
            size,
            capacity,
            sender: Mutex::new(Some(sender)),
            interrupt_tx,
            running,
            workers: tokio::sync::Mutex::new(workers),
            closed: AtomicBool::new(false),
        })
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<MessageTask<I, O>>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a task without waiting. A rejected task is dropped, which
    /// releases its in-flight slot and cancels its lease.
    pub fn submit(&self, task: MessageTask<I, O>) -> Result<()> {
        let guard = self.sender();
        let Some(sender) = guard.as_ref() else {
            return Err(LeaseholdError::TaskRejected(
                task.message_id().clone(),
                format!("worker pool {} is shut down", self.name),
            ));
        };
        sender.try_send(task).map_err(|err| {
            let (task, reason) = match err {
                TrySendError::Full(task) => (task, "task queue is full"),
                TrySendError::Closed(task) => (task, "task queue is closed"),
            };
            LeaseholdError::TaskRejected(task.message_id().clone(), reason.to_string())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        match self.sender().as_ref() {
            Some(sender) => self.capacity - sender.capacity(),
            None => 0,
        }
    }

    /// Tasks that can still be queued before `submit` rejects.
    pub fn remaining_capacity(&self) -> usize {
        self.sender().as_ref().map_or(0, |sender| sender.capacity())
    }

    /// Workers currently running a task.
    pub fn busy(&self) -> usize {
        self.running.len()
    }

    pub fn idle(&self) -> usize {
        self.size.saturating_sub(self.busy())
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop intake, wait up to `grace` for queued and running tasks, then
    /// interrupt. Returns `true` when every worker finished on its own.
    ///
    /// A zero grace interrupts right away; queued tasks that have not
    /// started are discarded.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::Release);
        drop(self.sender().take());

        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return true;
        }
        info!(
            pool = %self.name,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "shutting down worker pool"
        );

        if !grace.is_zero() {
            if tokio::time::timeout(grace, join_all(&mut workers)).await.is_ok() {
                info!(pool = %self.name, "worker pool drained");
                return true;
            }
            warn!(pool = %self.name, "grace period elapsed, interrupting running tasks");
        }

        // ignore send error: every worker may already be gone
        let _ = self.interrupt_tx.send(true);
        if tokio::time::timeout(FORCED_SHUTDOWN_WAIT, join_all(&mut workers))
            .await
            .is_ok()
        {
            info!(pool = %self.name, "worker pool stopped after interrupt");
            return true;
        }

        let aborted = self.running.abort_all();
        error!(
            pool = %self.name,
            stuck = workers.len(),
            aborted,
            "workers did not stop after interrupt, aborting"
        );
        for worker in workers.drain(..) {
            worker.abort();
        }
        false
    }

    /// Interrupt and stop every worker while leaving intake open, so the
    /// next submission finds the queue closed.
    #[cfg(test)]
    pub(crate) async fn stop_workers(&self) {
        let _ = self.interrupt_tx.send(true);
        join_all(&mut *self.workers.lock().await).await;
    }
}

/// Await every handle, dropping each one only after it completed so a
/// cancelled wait can be resumed.
async fn join_all(workers: &mut Vec<JoinHandle<()>>) {
    while let Some(last) = workers.last_mut() {
        let _ = last.await;
        workers.pop();
    }
}

async fn worker_loop<I, O>(
    worker_id: usize,
    worker_name: String,
    receiver: TaskReceiver<I, O>,
    mut interrupt: watch::Receiver<bool>,
    running: Arc<RunningTasks>,
) where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = signal::raised(&mut interrupt) => break,
                task = receiver.recv() => task,
            }
        };
        // sender dropped and queue drained
        let Some(task) = task else {
            break;
        };

        let message_id = task.message_id().clone();
        // own task, so a panicking callback does not take the worker down
        let handle = tokio::spawn(task.run(interrupt.clone()));
        running.start(worker_id, handle.abort_handle());
        let result = handle.await;
        running.finish(worker_id);

        match result {
            Ok(Ok(settlement)) => {
                debug!(worker = %worker_name, %message_id, ?settlement, "task settled");
            }
            Ok(Err(err)) => {
                error!(worker = %worker_name, %message_id, error = %err, "message task failed");
            }
            Err(err) => {
                error!(worker = %worker_name, %message_id, error = %err, "message task panicked");
            }
        }
    }
    debug!(worker = %worker_name, "worker stopped");
}
