//! App - the engine itself
//!
//! Wires ports, processing and lease renewal into a message handler.
//!
//! # Main components
//! - **HandlerFactory**: owns the transport and a shared LeaseScheduler, hands out builders
//! - **MessageHandlerBuilder**: configuration and fail-fast validation
//! - **MessageHandler**: dedup → admit → start lease → submit to pool → wait for a slot
//! - **WorkerPool**: fixed workers, bounded queue, staged shutdown

pub mod builder;
pub mod factory;
pub mod handler;
pub mod worker_pool;

pub use self::builder::{LEASE_SAFETY_MARGIN, MessageHandlerBuilder};
pub use self::factory::{DEFAULT_BATCH_SIZE, HandlerFactory};
pub use self::handler::MessageHandler;
pub use self::worker_pool::{FORCED_SHUTDOWN_WAIT, WorkerPool};
