//! Message - a delivered message, decoded once at the transport boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use super::ids::{MessageId, ReceiptHandle};
use crate::error::{LeaseholdError, TransportError};
use crate::ports::Acknowledger;

/// Transport metadata that travels with a message (sender, trace ids, ...).
pub type MessageAttributes = BTreeMap<String, String>;

/// A delivered message.
///
/// Carries the payload plus everything needed to keep it leased and to
/// acknowledge it: the stable id, the receipt handle of this delivery and
/// an acknowledgment capability supplied by the transport.
pub struct Message<I> {
    id: MessageId,
    receipt_handle: ReceiptHandle,
    payload: I,
    attributes: MessageAttributes,
    received_at: DateTime<Utc>,
    acknowledger: Arc<dyn Acknowledger>,
}

impl<I> Message<I> {
    pub fn new(
        id: MessageId,
        receipt_handle: ReceiptHandle,
        payload: I,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            id,
            receipt_handle,
            payload,
            attributes: MessageAttributes::new(),
            received_at: Utc::now(),
            acknowledger,
        }
    }

    pub fn with_attributes(mut self, attributes: MessageAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.receipt_handle
    }

    pub fn payload(&self) -> &I {
        &self.payload
    }

    pub fn attributes(&self) -> &MessageAttributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Delete the message at the transport.
    pub async fn ack(&self) -> Result<(), TransportError> {
        self.acknowledger.acknowledge(&self.receipt_handle).await
    }

    /// Replace the payload, keeping identity and acknowledgment capability.
    pub fn map_payload<T>(self, f: impl FnOnce(I) -> T) -> Message<T> {
        Message {
            id: self.id,
            receipt_handle: self.receipt_handle,
            payload: f(self.payload),
            attributes: self.attributes,
            received_at: self.received_at,
            acknowledger: self.acknowledger,
        }
    }

    pub fn try_map_payload<T, E>(
        self,
        f: impl FnOnce(I) -> Result<T, E>,
    ) -> Result<Message<T>, E> {
        let payload = f(self.payload)?;
        Ok(Message {
            id: self.id,
            receipt_handle: self.receipt_handle,
            payload,
            attributes: self.attributes,
            received_at: self.received_at,
            acknowledger: self.acknowledger,
        })
    }
}

impl Message<String> {
    /// Decode a JSON body into a typed payload.
    pub fn decode_json<T: DeserializeOwned>(self) -> Result<Message<T>, LeaseholdError> {
        let id = self.id.clone();
        self.try_map_payload(|body| serde_json::from_str(&body))
            .map_err(|e| LeaseholdError::Decode(id, e.to_string()))
    }
}

impl<I: fmt::Debug> fmt::Debug for Message<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("receipt_handle", &self.receipt_handle)
            .field("payload", &self.payload)
            .field("attributes", &self.attributes)
            .field("received_at", &self.received_at)
            .finish_non_exhaustive()
    }
}
