// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named background threads with a disconnect-to-stop signal.

use crate::error::{LinkError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// Background thread plus the sender half of its stop channel.
///
/// The thread receives the other half and must exit once `recv` on it
/// returns (the channel is only ever disconnected, never written to).
pub(crate) struct StopHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StopHandle {
    /// Spawn `body` on a thread called `name`.
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || body(stop_rx))
            .map_err(LinkError::Spawn)?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it. Safe to call more than once.
    ///
    /// When called from the thread itself the join is skipped.
    pub(crate) fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl StopHandle {
    /// Signal the thread without waiting for it; the thread is detached and
    /// exits on its own once it sees the signal.
    pub(crate) fn signal(mut self) {
        drop(self.stop_tx.take());
        drop(self.thread.take());
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
