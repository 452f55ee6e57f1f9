// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound dispatcher.
//!
//! Routes every source update to the right path:
//!
//! - `High` priority: distributed at once as a one-element batch.
//! - `Low` with guaranteed delivery: the guaranteed buffer.
//! - `Low` otherwise: the best-effort buffer.
//!
//! When a buffer flushes, expired updates are discarded and the rest is cut
//! into batches of at most `max_batch_size` values. Every batch goes to
//! every registered sender; a sender that fails loses that batch and the
//! others are unaffected.

use super::buffer::{BatchingBuffer, BufferConfig, BufferStats, FlushListener};
use crate::error::Result;
use crate::identity::SharedIdentity;
use crate::transport::{TransportError, UpdateSender};
use crate::update::{Priority, Quality, SourceUpdate, TagId, TimeToLive, UpdateBatch, Value};
use chrono::Utc;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// TTL of commfault tag updates, in milliseconds.
pub const COMMFAULT_TTL_MS: i64 = 9_999_999;

/// Log target for every value leaving the process.
const VALUES_TARGET: &str = "daqlink::values";

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Most values per outbound batch.
    pub max_batch_size: usize,
    pub best_effort: BufferConfig,
    pub guaranteed: BufferConfig,
    pub alive_tag_id: TagId,
    pub alive_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            best_effort: BufferConfig::default(),
            guaranteed: BufferConfig::default(),
            alive_tag_id: 0,
            alive_interval: Duration::from_secs(60),
        }
    }
}

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub values_accepted: AtomicU64,
    pub values_expired: AtomicU64,
    pub units_distributed: AtomicU64,
    pub send_failures: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            values_accepted: self.values_accepted.load(Ordering::Relaxed),
            values_expired: self.values_expired.load(Ordering::Relaxed),
            units_distributed: self.units_distributed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DispatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    pub values_accepted: u64,
    pub values_expired: u64,
    pub units_distributed: u64,
    pub send_failures: u64,
}

/// State shared by the direct path and both buffer flush paths.
struct DispatchCore {
    senders: RwLock<Vec<Arc<dyn UpdateSender>>>,
    identity: SharedIdentity,
    max_batch_size: usize,
    stats: DispatcherStats,
}

impl DispatchCore {
    fn new_batch(&self) -> UpdateBatch {
        let identity = self.identity.load();
        UpdateBatch::new(identity.process_id, identity.identification_token)
    }

    /// Forward one unit to every sender. Never fails.
    fn distribute(&self, batch: &UpdateBatch) {
        let senders = self.senders.read().clone();
        if senders.is_empty() {
            tracing::debug!("no senders registered, {} values not sent", batch.len());
        }

        for sender in &senders {
            let result = catch_unwind(AssertUnwindSafe(|| sender.send(batch)));
            let (lost, failure) = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => (e.lost_values().unwrap_or(batch.len()), e.to_string()),
                Err(_) => (batch.len(), "sender panicked".to_string()),
            };
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            if sender.is_critical() {
                tracing::error!(
                    "[{}] failed to send {} of {} values, those updates will be lost: {}",
                    sender.name(),
                    lost,
                    batch.len(),
                    failure
                );
            } else {
                tracing::debug!(
                    "[{}] failed to send {} of {} values: {}",
                    sender.name(),
                    lost,
                    batch.len(),
                    failure
                );
            }
        }

        self.stats.units_distributed.fetch_add(1, Ordering::Relaxed);
        for update in &batch.values {
            tracing::trace!(target: VALUES_TARGET, "{}", update);
        }
    }

    /// Drop expired values and send the rest in bounded batches.
    fn handle_flush(&self, items: Vec<SourceUpdate>) {
        tracing::debug!("pulled {} values from buffer", items.len());
        let now = Utc::now();
        let mut batch = self.new_batch();

        for update in items {
            if update.is_expired(now) {
                self.stats.values_expired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "discarded value update for tag {}, TTL exceeded",
                    update.id()
                );
                continue;
            }
            batch.push(update);
            if batch.len() >= self.max_batch_size {
                let full = std::mem::replace(&mut batch, self.new_batch());
                self.distribute(&full);
            }
        }

        if !batch.is_empty() {
            self.distribute(&batch);
        }
    }
}

impl FlushListener<SourceUpdate> for DispatchCore {
    fn on_flush(&self, items: Vec<SourceUpdate>) {
        self.handle_flush(items);
    }
}

/// Buffers, prioritizes and fans out source updates.
pub struct OutboundDispatcher {
    core: Arc<DispatchCore>,
    best_effort: BatchingBuffer<SourceUpdate>,
    guaranteed: BatchingBuffer<SourceUpdate>,
    alive_tag_id: TagId,
    alive_interval: Duration,
}

impl OutboundDispatcher {
    /// Create the dispatcher and its two buffers (disabled until
    /// [`enable`](Self::enable)).
    pub fn new(config: DispatcherConfig, identity: SharedIdentity) -> Result<Self> {
        let core = Arc::new(DispatchCore {
            senders: RwLock::new(Vec::new()),
            identity,
            max_batch_size: config.max_batch_size.max(1),
            stats: DispatcherStats::default(),
        });
        let listener: Arc<dyn FlushListener<SourceUpdate>> = core.clone();

        Ok(Self {
            best_effort: BatchingBuffer::new("best-effort", config.best_effort, listener.clone())?,
            guaranteed: BatchingBuffer::new("guaranteed", config.guaranteed, listener)?,
            core,
            alive_tag_id: config.alive_tag_id,
            alive_interval: config.alive_interval,
        })
    }

    pub fn add_sender(&self, sender: Arc<dyn UpdateSender>) {
        tracing::info!("registered sender {}", sender.name());
        self.core.senders.write().push(sender);
    }

    /// Remove every sender called `name`. Returns whether any was removed.
    pub fn remove_sender(&self, name: &str) -> bool {
        let mut senders = self.core.senders.write();
        let before = senders.len();
        senders.retain(|s| s.name() != name);
        before != senders.len()
    }

    pub fn sender_count(&self) -> usize {
        self.core.senders.read().len()
    }

    /// Route one update according to its priority and delivery class.
    pub fn add_value(&self, update: SourceUpdate) {
        self.core.stats.values_accepted.fetch_add(1, Ordering::Relaxed);
        match (update.priority(), update.is_guaranteed_delivery()) {
            (Priority::High, _) => {
                tracing::trace!("tag {}: high priority, sending now", update.id());
                self.send_now(update);
            }
            (Priority::Low, true) => self.guaranteed.push(update),
            (Priority::Low, false) => self.best_effort.push(update),
        }
    }

    fn send_now(&self, update: SourceUpdate) {
        let mut batch = self.core.new_batch();
        batch.push(update);
        self.core.distribute(&batch);
    }

    /// Publish the process alive tag. Its TTL is three alive intervals.
    pub fn send_alive(&self) {
        let identity = self.core.identity.load();
        let now = Utc::now();
        let alive = SourceUpdate::new(
            self.alive_tag_id,
            format!("{}::AliveTag", identity.process_name),
            Value::Integer(now.timestamp_millis()),
        )
        .with_control(true)
        .with_timestamp(now)
        .with_daq_timestamp(now)
        .with_priority(Priority::High)
        .with_guaranteed_delivery(false)
        .with_ttl(TimeToLive::from_duration(self.alive_interval * 3));

        tracing::debug!("sending alive tag {}", self.alive_tag_id);
        self.send_now(alive);
    }

    /// Publish a communication fault tag value.
    pub fn send_commfault_tag(
        &self,
        tag_id: TagId,
        tag_name: &str,
        value: bool,
        description: Option<&str>,
    ) {
        let mut commfault = SourceUpdate::new(tag_id, tag_name, value)
            .with_control(true)
            .with_quality(Quality::ok())
            .with_priority(Priority::High)
            .with_ttl(TimeToLive::Millis(COMMFAULT_TTL_MS));
        if let Some(description) = description {
            commfault = commfault.with_description(description);
        }

        tracing::debug!("sending commfault tag {}", tag_id);
        self.send_now(commfault);
    }

    /// Start flushing both buffers.
    pub fn enable(&self) {
        self.best_effort.enable();
        self.guaranteed.enable();
    }

    pub fn disable(&self) {
        self.best_effort.disable();
        self.guaranteed.disable();
    }

    /// Connect every sender. All are attempted; the first failure of a
    /// critical sender is returned.
    pub fn connect(&self) -> std::result::Result<(), TransportError> {
        let senders = self.core.senders.read().clone();
        let mut first_error = None;
        for sender in senders {
            if let Err(e) = sender.connect() {
                tracing::error!("[{}] connect failed: {}", sender.name(), e);
                if sender.is_critical() && first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Disable and close both buffers. Pending values are flushed first.
    pub fn close_buffers(&self) {
        self.best_effort.disable();
        self.best_effort.close();
        self.guaranteed.disable();
        self.guaranteed.close();
    }

    /// Shut every sender down.
    pub fn shutdown(&self) {
        let senders = self.core.senders.read().clone();
        for sender in senders {
            sender.shutdown();
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn buffer_stats(&self) -> (BufferStats, BufferStats) {
        (self.best_effort.stats(), self.guaranteed.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProcessIdentity;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingSender {
        name: String,
        batches: Mutex<Vec<UpdateBatch>>,
        fail: bool,
    }

    impl RecordingSender {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                fail,
                ..Default::default()
            })
        }

        fn values(&self) -> Vec<TagId> {
            self.batches
                .lock()
                .iter()
                .flat_map(|b| b.values.iter().map(SourceUpdate::id))
                .collect()
        }
    }

    impl UpdateSender for RecordingSender {
        fn name(&self) -> &str {
            &self.name
        }

        fn connect(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        fn send(&self, batch: &UpdateBatch) -> std::result::Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Send("broker unreachable".into()));
            }
            self.batches.lock().push(batch.clone());
            Ok(())
        }

        fn shutdown(&self) {}
    }

    fn dispatcher(max_batch_size: usize, min_size: usize, max_delay_ms: u64) -> OutboundDispatcher {
        let buffer = BufferConfig {
            min_size,
            max_delay: Duration::from_millis(max_delay_ms),
            max_window: 10_000,
        };
        let identity = SharedIdentity::new(ProcessIdentity::unconnected("P_TEST"));
        identity.assign(3, 4242);
        OutboundDispatcher::new(
            DispatcherConfig {
                max_batch_size,
                best_effort: buffer,
                guaranteed: buffer,
                alive_tag_id: 1001,
                alive_interval: Duration::from_secs(10),
            },
            identity,
        )
        .unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_high_priority_bypasses_buffer() {
        let d = dispatcher(100, 1000, 60_000);
        let sender = RecordingSender::new("s", false);
        d.add_sender(sender.clone());
        d.enable();

        d.add_value(SourceUpdate::new(1, "low", 1i64));
        d.add_value(SourceUpdate::new(2, "high", 2i64).with_priority(Priority::High));

        assert_eq!(sender.values(), vec![2]);
        let batches = sender.batches.lock();
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0].identification_token, Some(4242));
    }

    #[test]
    fn test_delivery_class_routing() {
        let d = dispatcher(100, 1000, 60_000);
        d.add_value(SourceUpdate::new(1, "a", 1i64).with_guaranteed_delivery(true));
        d.add_value(SourceUpdate::new(2, "b", 2i64));
        d.add_value(SourceUpdate::new(3, "c", 3i64));

        let (best_effort, guaranteed) = d.buffer_stats();
        assert_eq!(best_effort.pending, 2);
        assert_eq!(guaranteed.pending, 1);
    }

    #[test]
    fn test_flush_is_chunked() {
        let d = dispatcher(4, 10, 60_000);
        let sender = RecordingSender::new("s", false);
        d.add_sender(sender.clone());
        d.enable();

        for i in 0..10 {
            d.add_value(SourceUpdate::new(i, "v", i));
        }
        assert!(wait_for(|| sender.values().len() == 10));

        let sizes: Vec<usize> = sender.batches.lock().iter().map(UpdateBatch::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(sender.values(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_expired_values_discarded_on_flush() {
        let d = dispatcher(100, 3, 60_000);
        let sender = RecordingSender::new("s", false);
        d.add_sender(sender.clone());
        d.enable();

        let old = Utc::now() - ChronoDuration::seconds(10);
        d.add_value(
            SourceUpdate::new(1, "stale", 1i64)
                .with_daq_timestamp(old)
                .with_ttl(TimeToLive::Millis(1000)),
        );
        d.add_value(
            SourceUpdate::new(2, "ancient", 2i64)
                .with_daq_timestamp(old - ChronoDuration::days(3650))
                .with_ttl(TimeToLive::Forever),
        );
        d.add_value(SourceUpdate::new(3, "zero", 3i64).with_ttl(TimeToLive::Millis(0)));

        assert!(wait_for(|| d.stats().values_expired == 2));
        assert!(wait_for(|| sender.values() == vec![2]));
    }

    #[test]
    fn test_failing_sender_isolated() {
        let d = dispatcher(100, 1000, 60_000);
        let broken = RecordingSender::new("broken", true);
        let healthy = RecordingSender::new("healthy", false);
        d.add_sender(broken);
        d.add_sender(healthy.clone());

        for i in 0..3 {
            d.add_value(SourceUpdate::new(i, "h", i).with_priority(Priority::High));
        }
        assert_eq!(healthy.values(), vec![0, 1, 2]);
        assert_eq!(d.stats().send_failures, 3);
        assert_eq!(d.stats().units_distributed, 3);
    }

    #[test]
    fn test_no_senders_is_noop() {
        let d = dispatcher(100, 1000, 60_000);
        d.add_value(SourceUpdate::new(1, "h", 1i64).with_priority(Priority::High));
        d.send_alive();
        assert_eq!(d.stats().units_distributed, 2);
    }

    #[test]
    fn test_alive_tag_shape() {
        let d = dispatcher(100, 1000, 60_000);
        let sender = RecordingSender::new("s", false);
        d.add_sender(sender.clone());
        d.send_alive();

        let batches = sender.batches.lock();
        let alive = &batches[0].values[0];
        assert_eq!(alive.id(), 1001);
        assert_eq!(alive.name(), "P_TEST::AliveTag");
        assert!(alive.is_control());
        assert_eq!(alive.priority(), Priority::High);
        assert!(!alive.is_guaranteed_delivery());
        assert_eq!(alive.ttl(), TimeToLive::Millis(30_000));
    }

    #[test]
    fn test_commfault_tag_shape() {
        let d = dispatcher(100, 1000, 60_000);
        let sender = RecordingSender::new("s", false);
        d.add_sender(sender.clone());
        d.send_commfault_tag(77, "P_TEST:COMM_FAULT", false, Some("equipment down"));

        let batches = sender.batches.lock();
        let fault = &batches[0].values[0];
        assert_eq!(fault.id(), 77);
        assert_eq!(fault.value(), &Value::Boolean(false));
        assert_eq!(fault.value_description(), Some("equipment down"));
        assert_eq!(fault.ttl(), TimeToLive::Millis(COMMFAULT_TTL_MS));
    }

    #[test]
    fn test_close_buffers_flushes_pending() {
        let d = dispatcher(100, 1000, 60_000);
        let sender = RecordingSender::new("s", false);
        d.add_sender(sender.clone());
        d.enable();
        d.add_value(SourceUpdate::new(1, "a", 1i64));
        d.add_value(SourceUpdate::new(2, "b", 2i64).with_guaranteed_delivery(true));

        d.close_buffers();
        let mut ids = sender.values();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_remove_sender() {
        let d = dispatcher(100, 1000, 60_000);
        d.add_sender(RecordingSender::new("a", false));
        d.add_sender(RecordingSender::new("b", false));
        assert!(d.remove_sender("a"));
        assert!(!d.remove_sender("a"));
        assert_eq!(d.sender_count(), 1);
    }
}
