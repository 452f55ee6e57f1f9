// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound delivery: transport listener thread to application handler.

pub mod queue;
pub mod subscription;

pub use queue::{BoundedInboundQueue, SlowConsumerListener, UpdateHandler};
pub use subscription::Subscription;
