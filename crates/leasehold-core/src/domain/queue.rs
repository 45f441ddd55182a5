//! Queue identity and the immutable facts the engine needs about a queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Name of a queue as known to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Queue facts loaded once when a handler is built. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    name: QueueName,
    url: String,
    default_lease: Duration,
}

impl QueueDescriptor {
    pub fn new(name: QueueName, url: impl Into<String>, default_lease: Duration) -> Self {
        Self {
            name,
            url: url.into(),
            default_lease,
        }
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The queue's configured visibility timeout. Every renewal resets the
    /// lease to exactly this value.
    pub fn default_lease(&self) -> Duration {
        self.default_lease
    }
}
