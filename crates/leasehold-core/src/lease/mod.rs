//! Lease renewal: retry policy, per-message extender, scheduler.

pub mod extender;
pub mod retry;
pub mod scheduler;

pub use self::extender::LeaseExtender;
pub use self::retry::RetryPolicy;
pub use self::scheduler::{LeaseHandle, LeaseScheduler};
