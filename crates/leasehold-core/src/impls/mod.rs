//! Impls - in-process implementations of the ports, for development and tests.
//!
//! Real transports live in their own crates and implement
//! [`QueueTransport`](crate::ports::QueueTransport) and
//! [`Acknowledger`](crate::ports::Acknowledger).

pub mod inmem_transport;

pub use self::inmem_transport::InMemoryTransport;
