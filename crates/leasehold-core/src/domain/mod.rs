//! Domain model (ids, queue descriptor, message, outcomes).

pub mod ids;
pub mod message;
pub mod outcome;
pub mod queue;

pub use self::ids::{IdMarker, MessageId, ReceiptHandle};
pub use self::message::{Message, MessageAttributes};
pub use self::outcome::{Settlement, TaskOutcome};
pub use self::queue::{QueueDescriptor, QueueName};
