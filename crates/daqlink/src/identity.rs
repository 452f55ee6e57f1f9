// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process identity shared by every outbound path.
//!
//! The identity is written once per connection cycle (by the connect
//! handshake) and read on every flush, alive tick and lifecycle request.
//! [`SharedIdentity`] stores it behind an `ArcSwap` so readers never block the
//! writer and always observe a complete snapshot.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who this DAQ process is, as far as the server knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub process_name: String,
    /// Assigned by the server on connection.
    pub process_id: Option<i64>,
    /// Process identification key (PIK) assigned by the server on connection.
    pub identification_token: Option<i64>,
}

impl ProcessIdentity {
    /// Identity before any handshake.
    pub fn unconnected(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            process_id: None,
            identification_token: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.identification_token.is_some()
    }
}

/// Copy-on-write handle to the current [`ProcessIdentity`].
///
/// Cloning the handle shares the same underlying identity.
#[derive(Debug, Clone)]
pub struct SharedIdentity {
    inner: Arc<ArcSwap<ProcessIdentity>>,
}

impl SharedIdentity {
    pub fn new(identity: ProcessIdentity) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(identity)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<ProcessIdentity> {
        self.inner.load_full()
    }

    /// Store the id and token returned by a successful connect handshake.
    pub fn assign(&self, process_id: i64, identification_token: i64) {
        self.inner.rcu(|current| ProcessIdentity {
            process_name: current.process_name.clone(),
            process_id: Some(process_id),
            identification_token: Some(identification_token),
        });
    }

    /// Forget the server-assigned id and token (before reconnecting).
    pub fn clear(&self) {
        self.inner
            .rcu(|current| ProcessIdentity::unconnected(current.process_name.clone()));
    }
}
