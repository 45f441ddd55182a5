//! Processing - one message from admission to settlement
//!
//! - **InFlightSet**: deduplication + backpressure
//! - **TrackedMessage**: message plus its acknowledged flag
//! - **ErrorHandlingStrategy**: what to do on failure
//! - **MessageTask**: run worker → callback → ack → cleanup

pub mod in_flight;
pub mod strategy;
pub mod task;
pub mod tracked;

pub use self::in_flight::InFlightSet;
pub use self::strategy::{
    DefaultErrorHandlingStrategy, ErrorHandlingStrategy, LogAndConsumeStrategy,
    LogAndRethrowStrategy,
};
pub use self::task::{MessageTask, SettleGuard};
pub use self::tracked::TrackedMessage;
