//! leasehold-core
//!
//! Consumer-side engine for lease-based queues: bounded admission,
//! in-flight deduplication with backpressure, per-message lease renewal and
//! the error-handling / acknowledgment lifecycle of one message.
//!
//! # Modules
//! - **domain**: Message, ids, QueueDescriptor, TaskOutcome / Settlement
//! - **ports**: QueueTransport, Acknowledger, MessageWorker, CompletionCallback
//! - **processing**: InFlightSet, ErrorHandlingStrategy, MessageTask
//! - **lease**: LeaseExtender, RetryPolicy, LeaseScheduler
//! - **app**: HandlerFactory, MessageHandlerBuilder, MessageHandler, WorkerPool
//! - **impls**: InMemoryTransport (development and tests)
//! - **config** / **error** / **observability**

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod lease;
pub mod observability;
pub mod ports;
pub mod processing;

mod signal;

pub use app::{HandlerFactory, MessageHandler, MessageHandlerBuilder};
pub use config::HandlerConfig;
pub use domain::{Message, MessageId, QueueDescriptor, QueueName, ReceiptHandle, Settlement};
pub use error::{LeaseholdError, Result, StrategyError, TransportError, WorkerError};
pub use lease::RetryPolicy;
pub use observability::HandlerStats;
pub use ports::{Acknowledger, CompletionCallback, MessageWorker, NoopCallback, QueueTransport};
pub use processing::{
    DefaultErrorHandlingStrategy, ErrorHandlingStrategy, LogAndConsumeStrategy,
    LogAndRethrowStrategy,
};
