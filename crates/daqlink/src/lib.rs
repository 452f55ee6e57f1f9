// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DAQ telemetry transport layer.
//!
//! Moves source values from a data acquisition process to a monitoring
//! server over a message broker, and handles the process lifecycle
//! handshakes with that server.
//!
//! # Components
//!
//! - **OutboundDispatcher**: prioritizes values, batches the low priority
//!   ones in two [`BatchingBuffer`]s (best-effort and guaranteed delivery)
//!   and fans every unit out to the registered senders
//! - **RequestReplyCoordinator**: correlated request/reply with a timeout
//!   over a one-way transport
//! - **LivenessPublisher**: periodic alive tag
//! - **BoundedInboundQueue**: backpressured delivery of inbound messages to
//!   a single listener, with slow consumer detection
//! - **DaqSession**: connect, configure, publish, disconnect
//!
//! # Quick Start
//!
//! ```bash
//! # Write the default configuration
//! daqlink gen-config --output daqlink.toml
//!
//! # Run a process against an in-memory broker and server
//! daqlink simulate --config daqlink.toml --duration-secs 10
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [process]
//! name = "P_PLC01"
//! alive_tag_id = 1001
//!
//! [outbound.best_effort]
//! min_size = 200
//! max_delay_ms = 1000
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod inbound;
pub mod liveness;
pub mod outbound;
pub mod request;
pub mod session;
pub mod transport;
pub mod update;

mod worker;

pub use config::{ConfigError, LinkConfig};
pub use error::{LinkError, Result};
pub use identity::{ProcessIdentity, SharedIdentity};
pub use inbound::{BoundedInboundQueue, SlowConsumerListener, Subscription, UpdateHandler};
pub use liveness::{AliveSink, LivenessPublisher};
pub use outbound::{
    BatchingBuffer, BufferConfig, DispatcherConfig, DispatcherStatsSnapshot, OutboundDispatcher,
};
pub use request::{
    ProcessRequestSender, RequestOutcome, RequestReplyCoordinator, RequestState,
};
pub use session::DaqSession;
pub use transport::{
    Destination, MemoryBroker, Transport, TransportError, TransportSender, UpdateSender,
};
pub use update::{Priority, Quality, QualityCode, SourceUpdate, TimeToLive, UpdateBatch, Value};
