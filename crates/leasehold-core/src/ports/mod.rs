//! Ports - seams to the outside world.
//!
//! The queue transport and the application worker are the two
//! collaborators the engine does not implement itself.

pub mod transport;
pub mod worker;

pub use self::transport::{Acknowledger, QueueTransport};
pub use self::worker::{CompletionCallback, MessageWorker, NoopCallback};
