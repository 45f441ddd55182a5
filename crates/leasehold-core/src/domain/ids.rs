//! Strongly-typed identifiers handed out by the transport.
//!
//! Message ids and receipt handles are both plain strings on the wire, so
//! they share one generic `Id<T>` and a zero-sized marker keeps them apart
//! at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for the kinds of identifier.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used when an identifier is generated locally (e.g. "msg-").
    fn prefix() -> &'static str;
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Generate a fresh, sortable identifier.
    pub fn generate() -> Self {
        Self::new(format!("{}{}", T::prefix(), Ulid::new()))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

// derive would put bounds on T, which is never instantiated.
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> From<String> for Id<T> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Receipt {}

impl IdMarker for Receipt {
    fn prefix() -> &'static str {
        "rcpt-"
    }
}

/// Identity of a delivered message. Stable across redeliveries.
pub type MessageId = Id<Message>;

/// Token the transport needs to renew the lease of one particular delivery.
pub type ReceiptHandle = Id<Receipt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_prefix() {
        let message_id = MessageId::generate();
        let receipt = ReceiptHandle::generate();

        assert!(message_id.as_str().starts_with("msg-"));
        assert!(receipt.as_str().starts_with("rcpt-"));
        assert_ne!(MessageId::generate(), message_id);
    }

    #[test]
    fn ids_compare_by_value() {
        let a = MessageId::from("m1");
        let b = MessageId::new(String::from("m1"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "m1");
        // let _: ReceiptHandle = a; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = MessageId::from("m-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"m-42\"");
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
