// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker.
//!
//! Named destinations are created on first use and hold a FIFO of payloads.
//! Messages sent with a TTL are dropped by [`Transport::receive`] once their
//! window has passed. Reply destinations are exclusive: after
//! [`Transport::close`], sends to them fail, so a late reply never reaches
//! anyone.

use super::{Destination, Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const REPLY_PREFIX: &str = "temp-reply-";

struct Envelope {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<Destination, VecDeque<Envelope>>,
    /// Reply destinations currently open. An issued id missing from this
    /// set has been closed.
    replies: HashSet<Destination>,
}

/// In-memory [`Transport`] shared by every client in the process.
pub struct MemoryBroker {
    connected: AtomicBool,
    state: Mutex<BrokerState>,
    arrived: Condvar,
    next_reply: AtomicU64,
    expired: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            state: Mutex::new(BrokerState::default()),
            arrived: Condvar::new(),
            next_reply: AtomicU64::new(1),
            expired: AtomicU64::new(0),
        }
    }

    /// Drop the connection. Blocked receivers wake up with `NotConnected`.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let _guard = self.state.lock();
        self.arrived.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of reply destinations created and not yet closed.
    pub fn open_reply_destinations(&self) -> usize {
        self.state.lock().replies.len()
    }

    /// Messages waiting on `destination`, expired ones included.
    pub fn pending(&self, destination: &Destination) -> usize {
        self.state
            .lock()
            .queues
            .get(destination)
            .map_or(0, VecDeque::len)
    }

    /// Messages discarded because their TTL elapsed before delivery.
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn check_reply_destination(
        &self,
        state: &BrokerState,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        let Some(suffix) = destination.as_str().strip_prefix(REPLY_PREFIX) else {
            return Ok(());
        };
        if state.replies.contains(destination) {
            return Ok(());
        }
        match suffix.parse::<u64>() {
            Ok(id) if id < self.next_reply.load(Ordering::Relaxed) => {
                Err(TransportError::DestinationClosed(destination.to_string()))
            }
            _ => Err(TransportError::UnknownDestination(destination.to_string())),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryBroker {
    fn connect(&self) -> Result<(), TransportError> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            tracing::debug!("memory broker connected");
        }
        Ok(())
    }

    fn send(
        &self,
        destination: &Destination,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        self.check_reply_destination(&state, destination)?;

        state
            .queues
            .entry(destination.clone())
            .or_default()
            .push_back(Envelope {
                payload: payload.to_vec(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            });
        self.arrived.notify_all();
        Ok(())
    }

    fn create_reply_destination(&self) -> Result<Destination, TransportError> {
        self.ensure_connected()?;
        let id = self.next_reply.fetch_add(1, Ordering::Relaxed);
        let destination = Destination::new(format!("{}{}", REPLY_PREFIX, id));

        let mut state = self.state.lock();
        state.replies.insert(destination.clone());
        state.queues.insert(destination.clone(), VecDeque::new());
        Ok(destination)
    }

    fn receive(
        &self,
        destination: &Destination,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            self.ensure_connected()?;
            self.check_reply_destination(&state, destination)?;

            let now = Instant::now();
            if let Some(queue) = state.queues.get_mut(destination) {
                while let Some(envelope) = queue.pop_front() {
                    if envelope.expires_at.is_some_and(|at| at < now) {
                        self.expired.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("discarding expired message on {}", destination);
                        continue;
                    }
                    return Ok(Some(envelope.payload));
                }
            }

            if now >= deadline {
                return Ok(None);
            }
            self.arrived.wait_until(&mut state, deadline);
        }
    }

    fn close(&self, destination: &Destination) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.queues.remove(destination);
        state.replies.remove(destination);
        self.arrived.notify_all();
        Ok(())
    }
}
