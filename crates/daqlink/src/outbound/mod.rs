// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound telemetry: batching buffers and the dispatcher that owns them.

pub mod buffer;
pub mod dispatcher;

pub use buffer::{BatchingBuffer, BufferConfig, BufferStats, FlushListener};
pub use dispatcher::{
    DispatcherConfig, DispatcherStats, DispatcherStatsSnapshot, OutboundDispatcher,
};
