// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Errors surfaced to whoever owns the process lifecycle.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("no connection reply from server within {0} ms")]
    ConnectTimeout(u64),

    #[error("server rejected connection of process {0}")]
    ConnectionRejected(String),

    #[error("no configuration reply from server within {0} ms")]
    ConfigurationTimeout(u64),

    #[error("server rejected configuration request: {0}")]
    ConfigurationRejected(String),

    #[error("component was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("session is already started")]
    AlreadyStarted,

    #[error("queue is stopped")]
    QueueStopped,
}

pub type Result<T> = std::result::Result<T, LinkError>;
