// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every
//! field has a default, so an empty file is a valid configuration.

use crate::outbound::{BufferConfig, DispatcherConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub process: ProcessSection,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub outbound: OutboundSection,

    #[serde(default)]
    pub inbound: InboundSection,
}

/// Identity of this DAQ process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSection {
    /// Name the server knows this process by.
    #[serde(default = "default_process_name")]
    pub name: String,

    /// Tag id of the process alive tag.
    #[serde(default)]
    pub alive_tag_id: i64,

    #[serde(default = "default_alive_interval_ms")]
    pub alive_interval_ms: u64,
}

/// Broker destinations and request timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_request_destination")]
    pub request_destination: String,

    #[serde(default = "default_update_destination")]
    pub update_destination: String,

    /// Timeout of configuration requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout of the connect handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Outbound buffering and batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundSection {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Largest encoded message; bigger batches are split.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default)]
    pub best_effort: BufferSection,

    #[serde(default)]
    pub guaranteed: BufferSection,
}

/// One batching buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSection {
    #[serde(default = "default_min_size")]
    pub min_size: usize,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_max_window")]
    pub max_window: usize,
}

/// Inbound delivery queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_slow_consumer_warning_ms")]
    pub slow_consumer_warning_ms: u64,
}

fn default_process_name() -> String {
    "P_DAQLINK".to_string()
}

fn default_alive_interval_ms() -> u64 {
    60_000
}

fn default_request_destination() -> String {
    "daq.process.request".to_string()
}

fn default_update_destination() -> String {
    "daq.process.update".to_string()
}

fn default_request_timeout_ms() -> u64 {
    12_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_message_bytes() -> usize {
    1_048_576
}

fn default_min_size() -> usize {
    200
}

fn default_max_delay_ms() -> u64 {
    1_000
}

fn default_max_window() -> usize {
    10_000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_slow_consumer_warning_ms() -> u64 {
    30_000
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            name: default_process_name(),
            alive_tag_id: 0,
            alive_interval_ms: default_alive_interval_ms(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            request_destination: default_request_destination(),
            update_destination: default_update_destination(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for OutboundSection {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_message_bytes: default_max_message_bytes(),
            best_effort: BufferSection::default(),
            guaranteed: BufferSection::default(),
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_delay_ms: default_max_delay_ms(),
            max_window: default_max_window(),
        }
    }
}

impl Default for InboundSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            slow_consumer_warning_ms: default_slow_consumer_warning_ms(),
        }
    }
}

impl BufferSection {
    pub fn to_buffer_config(&self) -> BufferConfig {
        BufferConfig {
            min_size: self.min_size,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_window: self.max_window,
        }
    }

    fn validate(&self, which: &str) -> Result<(), ConfigError> {
        if self.min_size == 0 || self.max_window == 0 || self.max_delay_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "outbound.{}: min_size, max_delay_ms and max_window must be non-zero",
                which
            )));
        }
        if self.min_size > self.max_window {
            return Err(ConfigError::Invalid(format!(
                "outbound.{}: min_size ({}) exceeds max_window ({})",
                which, self.min_size, self.max_window
            )));
        }
        Ok(())
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the given process name.
    pub fn for_process(name: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.process.name = name.into();
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process.name.trim().is_empty() {
            return Err(ConfigError::Invalid("process.name is empty".into()));
        }
        if self.process.alive_interval_ms == 0 {
            return Err(ConfigError::Invalid("process.alive_interval_ms must be non-zero".into()));
        }

        let transport = &self.transport;
        if transport.request_destination.is_empty() || transport.update_destination.is_empty() {
            return Err(ConfigError::Invalid("transport destinations must not be empty".into()));
        }
        if transport.request_timeout_ms == 0 || transport.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("transport timeouts must be non-zero".into()));
        }
        if transport.connect_timeout_ms > transport.request_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "transport.connect_timeout_ms ({}) exceeds request_timeout_ms ({})",
                transport.connect_timeout_ms, transport.request_timeout_ms
            )));
        }

        if self.outbound.max_batch_size == 0 || self.outbound.max_message_bytes == 0 {
            return Err(ConfigError::Invalid(
                "outbound.max_batch_size and max_message_bytes must be non-zero".into(),
            ));
        }
        self.outbound.best_effort.validate("best_effort")?;
        self.outbound.guaranteed.validate("guaranteed")?;

        let inbound = &self.inbound;
        if inbound.queue_capacity == 0
            || inbound.poll_interval_ms == 0
            || inbound.slow_consumer_warning_ms == 0
        {
            return Err(ConfigError::Invalid("inbound values must be non-zero".into()));
        }

        Ok(())
    }

    pub fn alive_interval(&self) -> Duration {
        Duration::from_millis(self.process.alive_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.connect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbound.poll_interval_ms)
    }

    pub fn slow_consumer_warning(&self) -> Duration {
        Duration::from_millis(self.inbound.slow_consumer_warning_ms)
    }

    /// Dispatcher settings derived from `[process]` and `[outbound]`.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_batch_size: self.outbound.max_batch_size,
            best_effort: self.outbound.best_effort.to_buffer_config(),
            guaranteed: self.outbound.guaranteed.to_buffer_config(),
            alive_tag_id: self.process.alive_tag_id,
            alive_interval: self.alive_interval(),
        }
    }
}

/// Commented default configuration written by `daqlink gen-config`.
pub const EXAMPLE_CONFIG: &str = r#"# daqlink configuration

[process]
name = "P_DAQLINK"
alive_tag_id = 0
alive_interval_ms = 60000

[transport]
request_destination = "daq.process.request"
update_destination = "daq.process.update"
# Configuration request timeout
request_timeout_ms = 12000
# Connect handshake timeout (must not exceed request_timeout_ms)
connect_timeout_ms = 5000

[outbound]
max_batch_size = 100
max_message_bytes = 1048576

[outbound.best_effort]
min_size = 200
max_delay_ms = 1000
max_window = 10000

[outbound.guaranteed]
min_size = 200
max_delay_ms = 1000
max_window = 10000

[inbound]
queue_capacity = 10000
poll_interval_ms = 2000
slow_consumer_warning_ms = 30000
"#;
