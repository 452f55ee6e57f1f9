// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for integration tests.

#![allow(dead_code)]

use daqlink::update::TagId;
use daqlink::{
    BufferConfig, DispatcherConfig, OutboundDispatcher, ProcessIdentity, SharedIdentity,
    TransportError, UpdateBatch, UpdateSender,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sender that keeps every unit it is given, with its arrival time.
pub struct RecordingSender {
    name: String,
    pub units: Mutex<Vec<(Instant, UpdateBatch)>>,
}

impl RecordingSender {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            units: Mutex::new(Vec::new()),
        })
    }

    pub fn unit_count(&self) -> usize {
        self.units.lock().len()
    }

    pub fn tag_ids(&self) -> Vec<TagId> {
        self.units
            .lock()
            .iter()
            .flat_map(|(_, unit)| unit.values.iter().map(|v| v.id()))
            .collect()
    }
}

impl UpdateSender for RecordingSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, batch: &UpdateBatch) -> Result<(), TransportError> {
        self.units.lock().push((Instant::now(), batch.clone()));
        Ok(())
    }

    fn shutdown(&self) {}
}

/// Sender that fails every call, one way or another.
pub struct BrokenSender {
    pub panic: bool,
}

impl UpdateSender for BrokenSender {
    fn name(&self) -> &str {
        "broken"
    }

    fn connect(&self) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn send(&self, _batch: &UpdateBatch) -> Result<(), TransportError> {
        if self.panic {
            panic!("sender bug");
        }
        Err(TransportError::Send("connection reset".into()))
    }

    fn shutdown(&self) {}

    fn is_critical(&self) -> bool {
        false
    }
}

/// Connected dispatcher with both buffers set to `min_size`/`max_delay`.
pub fn dispatcher(min_size: usize, max_delay: Duration) -> OutboundDispatcher {
    let buffer = BufferConfig {
        min_size,
        max_delay,
        max_window: 10_000,
    };
    let identity = SharedIdentity::new(ProcessIdentity::unconnected("P_TEST"));
    identity.assign(12, 3456);
    let dispatcher = OutboundDispatcher::new(
        DispatcherConfig {
            max_batch_size: 100,
            best_effort: buffer,
            guaranteed: buffer,
            alive_tag_id: 1,
            alive_interval: Duration::from_secs(10),
        },
        identity,
    )
    .unwrap();
    dispatcher.enable();
    dispatcher
}

/// Poll `cond` for up to five seconds.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
