use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::lease::RetryPolicy;

/// Message handler configuration, deserializable from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Workers running in parallel; also the in-flight bound.
    pub concurrency: usize,
    /// Maximum messages the transport returns per fetch. The worker pool
    /// queues up to `batch_size - 1` admitted messages.
    pub batch_size: usize,
    pub extension_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            batch_size: 10,
            extension_interval_secs: 20,
            shutdown_grace_secs: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl HandlerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn extension_interval(&self) -> Duration {
        Duration::from_secs(self.extension_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
