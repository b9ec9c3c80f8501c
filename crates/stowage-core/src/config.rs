//! Scheduler configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the operation scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct SchedulerConfig {
    /// Maximum number of operations running at once.
    #[builder(default = "3")]
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Backoff of the run loop and of the drain in `stop()`, in milliseconds.
    #[builder(default = "500")]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Read size for streamed downloads, in bytes.
    #[builder(default = "512 * 1024")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Name prefix of staged temporary entries.
    #[builder(default = "default_temp_prefix()")]
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_chunk_size() -> usize {
    512 * 1024
}

const DEFAULT_TEMP_PREFIX: &str = ".stowage-tmp-";

fn default_temp_prefix() -> String {
    DEFAULT_TEMP_PREFIX.to_string()
}

impl SchedulerConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        check_values(
            self.max_concurrent.unwrap_or_else(default_max_concurrent),
            self.chunk_size.unwrap_or_else(default_chunk_size),
            self.temp_prefix.as_deref().unwrap_or(DEFAULT_TEMP_PREFIX),
        )
    }
}

fn check_values(max_concurrent: usize, chunk_size: usize, temp_prefix: &str) -> Result<(), String> {
    if max_concurrent == 0 {
        return Err("max_concurrent must be at least 1".to_string());
    }
    if chunk_size == 0 {
        return Err("chunk_size must be at least 1".to_string());
    }
    if temp_prefix.is_empty() || temp_prefix.contains('/') {
        return Err("temp_prefix must be a non-empty name".to_string());
    }
    Ok(())
}

impl SchedulerConfig {
    /// Create a new scheduler config builder.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Check a config that did not come from the builder, e.g. one read
    /// from a file.
    pub fn validate(&self) -> Result<(), String> {
        check_values(self.max_concurrent, self.chunk_size, &self.temp_prefix)
    }

    /// The run-loop backoff as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
            chunk_size: default_chunk_size(),
            temp_prefix: default_temp_prefix(),
        }
    }
}
