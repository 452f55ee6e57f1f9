// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Correlated request/reply and the process lifecycle handshakes built on it.

pub mod coordinator;
pub mod process;

pub use coordinator::{RequestOutcome, RequestReplyCoordinator, RequestState};
pub use process::{ConnectionReply, ProcessRequestSender, CONNECT_TIMEOUT};
