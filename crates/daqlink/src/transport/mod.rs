// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction.
//!
//! The broker client is an external collaborator. Everything in this crate
//! talks to it through [`Transport`], which is injected into each component
//! at construction time:
//!
//! ```ignore
//! impl Transport for MyBrokerClient {
//!     fn send(&self, destination: &Destination, payload: &[u8], ttl: Option<Duration>)
//!         -> Result<(), TransportError> {
//!         // publish on the broker...
//!     }
//!     // ...
//! }
//! ```
//!
//! [`memory::MemoryBroker`] is a complete in-process implementation used by
//! tests and by the `simulate` command.

pub mod memory;
pub mod sender;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryBroker;
pub use sender::{TransportSender, UpdateSender};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("destination closed: {0}")]
    DestinationClosed(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("transport shut down")]
    Shutdown,

    #[error("{lost} of {total} values not delivered: {source}")]
    PartialDelivery {
        lost: usize,
        total: usize,
        source: Box<TransportError>,
    },
}

impl TransportError {
    /// Values lost when only part of a unit went out.
    pub fn lost_values(&self) -> Option<usize> {
        match self {
            Self::PartialDelivery { lost, .. } => Some(*lost),
            _ => None,
        }
    }
}

/// Named queue or topic on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Point-to-point messaging over a broker connection.
///
/// A receive timeout is not an error: [`Transport::receive`] returns
/// `Ok(None)` when nothing arrived in time.
pub trait Transport: Send + Sync {
    /// Establish the broker connection.
    fn connect(&self) -> Result<(), TransportError>;

    /// Publish `payload` on `destination`.
    ///
    /// With a `ttl`, the broker may discard the message once it has not
    /// been delivered within that window.
    fn send(
        &self,
        destination: &Destination,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), TransportError>;

    /// Create an exclusive, connection-scoped destination for one reply.
    fn create_reply_destination(&self) -> Result<Destination, TransportError>;

    /// Wait up to `timeout` for the next message on `destination`.
    fn receive(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release a destination created by [`Transport::create_reply_destination`].
    fn close(&self, destination: &Destination) -> Result<(), TransportError>;
}
