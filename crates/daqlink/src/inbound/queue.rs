// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded inbound queue with slow-consumer detection.
//!
//! The transport's delivery thread hands raw messages to
//! [`BoundedInboundQueue::on_message`]. Each message is decoded and put on a
//! bounded channel; when the channel is full the delivery thread blocks,
//! which pushes back on the broker instead of dropping data. A single
//! worker thread drains the channel and invokes the handler one update at a
//! time.
//!
//! While the handler runs, the worker stores the invocation start time. If
//! a new message arrives and that invocation has been running longer than
//! the warning threshold, the [`SlowConsumerListener`] is told before the
//! new update is enqueued.
//!
//! The lifecycle is one-shot: `start` after `stop` fails.

use crate::error::{LinkError, Result};
use crate::worker::StopHandle;
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default slow-consumer warning threshold.
pub const DEFAULT_WARNING_THRESHOLD: Duration = Duration::from_millis(30_000);
/// Default worker poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per update kind: how to decode it, describe it and hand it to the
/// application.
pub trait UpdateHandler: Send + Sync + 'static {
    type Update: Send + 'static;

    /// Decode a raw transport payload.
    fn decode(&self, raw: &[u8]) -> anyhow::Result<Self::Update>;

    /// Human-readable description used in slow-consumer warnings.
    fn describe(&self, update: &Self::Update) -> String;

    /// Deliver to the application. Runs on the queue's worker thread.
    fn notify(&self, update: Self::Update) -> anyhow::Result<()>;
}

/// Receives slow-consumer warnings.
pub trait SlowConsumerListener: Send + Sync {
    fn on_slow_consumer(&self, warning: &str);
}

impl<F> SlowConsumerListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_slow_consumer(&self, warning: &str) {
        self(warning)
    }
}

/// Start time of the running handler invocation and the warning threshold.
#[derive(Debug)]
struct ConsumerHealth {
    epoch: Instant,
    /// Milliseconds since `epoch`, plus one. Zero while idle.
    notification_start: AtomicU64,
    warning_threshold_ms: AtomicU64,
}

impl ConsumerHealth {
    fn new(threshold: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            notification_start: AtomicU64::new(0),
            warning_threshold_ms: AtomicU64::new(duration_ms(threshold)),
        }
    }

    fn now(&self) -> u64 {
        duration_ms(self.epoch.elapsed()) + 1
    }

    fn begin(&self) {
        self.notification_start.store(self.now(), Ordering::Release);
    }

    fn end(&self) {
        self.notification_start.store(0, Ordering::Release);
    }

    /// Elapsed handler time if it exceeds the threshold.
    fn overdue(&self) -> Option<u64> {
        let start = self.notification_start.load(Ordering::Acquire);
        if start == 0 {
            return None;
        }
        let elapsed = self.now().saturating_sub(start);
        (elapsed > self.warning_threshold_ms.load(Ordering::Relaxed)).then_some(elapsed)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

enum Lifecycle {
    Created,
    Running(StopHandle),
    Stopped,
}

/// Bounded FIFO between a transport delivery thread and one handler.
pub struct BoundedInboundQueue<H: UpdateHandler> {
    name: String,
    handler: Arc<H>,
    tx: Sender<H::Update>,
    rx: Receiver<H::Update>,
    poll_interval: Duration,
    health: Arc<ConsumerHealth>,
    slow_listener: Option<Arc<dyn SlowConsumerListener>>,
    lifecycle: Mutex<Lifecycle>,
    delivered: Arc<AtomicU64>,
    dropped: AtomicU64,
}

impl<H: UpdateHandler> BoundedInboundQueue<H> {
    /// Create a stopped queue. Call [`start`](Self::start) to begin delivery.
    pub fn new(name: impl Into<String>, handler: Arc<H>, capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity.max(1));
        Self {
            name: name.into(),
            handler,
            tx,
            rx,
            poll_interval: DEFAULT_POLL_INTERVAL,
            health: Arc::new(ConsumerHealth::new(DEFAULT_WARNING_THRESHOLD)),
            slow_listener: None,
            lifecycle: Mutex::new(Lifecycle::Created),
            delivered: Arc::new(AtomicU64::new(0)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_warning_threshold(self, threshold: Duration) -> Self {
        self.set_notification_time_before_warning(threshold);
        self
    }

    pub fn with_slow_consumer_listener(mut self, listener: Arc<dyn SlowConsumerListener>) -> Self {
        self.slow_listener = Some(listener);
        self
    }

    /// Entry point for the transport: decode, check consumer health, enqueue.
    ///
    /// Undecodable messages are dropped with a warning. Never panics.
    pub fn on_message(&self, raw: &[u8]) {
        let update = match catch_unwind(AssertUnwindSafe(|| self.handler.decode(raw))) {
            Ok(Ok(update)) => update,
            Ok(Err(e)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("[{}] dropping undecodable message: {:#}", self.name, e);
                return;
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!("[{}] decoder panicked, message dropped", self.name);
                return;
            }
        };

        if let Err(e) = self.enqueue(update) {
            tracing::warn!("[{}] update not queued: {}", self.name, e);
        }
    }

    /// Put an update on the queue, blocking while it is full.
    ///
    /// The slow-consumer check runs before the update is queued, even when
    /// the queue is currently full. Fails only once the queue is stopped.
    pub fn enqueue(&self, update: H::Update) -> Result<()> {
        self.check_consumer_health(&update);

        let mut pending = update;
        loop {
            if self.is_stopped() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(LinkError::QueueStopped);
            }
            match self.tx.send_timeout(pending, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    tracing::trace!("[{}] queue full, producer waiting", self.name);
                    pending = back;
                }
                // The queue owns a receiver, so the channel never disconnects.
                Err(SendTimeoutError::Disconnected(_)) => return Err(LinkError::QueueStopped),
            }
        }
    }

    fn check_consumer_health(&self, update: &H::Update) {
        let Some(elapsed) = self.health.overdue() else {
            return;
        };
        let warning = format!(
            "Slow consumer warning: listener of queue {} has been processing an update for {} ms \
             (threshold {} ms). Event type: {}",
            self.name,
            elapsed,
            self.health.warning_threshold_ms.load(Ordering::Relaxed),
            self.handler.describe(update)
        );
        tracing::warn!("{}", warning);
        if let Some(listener) = &self.slow_listener {
            listener.on_slow_consumer(&warning);
        }
    }

    /// Start the worker thread. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Stopped => return Err(LinkError::AlreadyStopped),
            Lifecycle::Created => {}
        }

        let rx = self.rx.clone();
        let handler = Arc::clone(&self.handler);
        let health = Arc::clone(&self.health);
        let delivered = Arc::clone(&self.delivered);
        let poll = self.poll_interval;
        let name = self.name.clone();

        let worker = StopHandle::spawn(format!("daqlink-inbound-{}", self.name), move |stop_rx| {
            delivery_loop(&name, &stop_rx, &rx, handler.as_ref(), &health, &delivered, poll)
        })?;

        *lifecycle = Lifecycle::Running(worker);
        tracing::info!("[{}] inbound queue started", self.name);
        Ok(())
    }

    /// Stop delivery. Returns without waiting for a running handler
    /// invocation; the worker exits once that invocation finishes.
    /// Safe to call multiple times; the queue cannot be restarted.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        if let Lifecycle::Running(worker) = previous {
            worker.signal();
            let left = self.rx.len();
            if left > 0 {
                tracing::warn!("[{}] stopped with {} undelivered updates", self.name, left);
            }
            tracing::info!("[{}] inbound queue stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    fn is_stopped(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Stopped)
    }

    /// Updates waiting for delivery.
    pub fn queue_size(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(0)
    }

    pub fn notification_time_before_warning(&self) -> Duration {
        Duration::from_millis(self.health.warning_threshold_ms.load(Ordering::Relaxed))
    }

    pub fn set_notification_time_before_warning(&self, threshold: Duration) {
        self.health
            .warning_threshold_ms
            .store(duration_ms(threshold), Ordering::Relaxed);
    }

    /// Handler invocations completed (successfully or not).
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages dropped as undecodable or after stop.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

enum Poll<U> {
    Stop,
    Idle,
    Item(U),
}

fn delivery_loop<H: UpdateHandler>(
    name: &str,
    stop_rx: &Receiver<()>,
    rx: &Receiver<H::Update>,
    handler: &H,
    health: &ConsumerHealth,
    delivered: &AtomicU64,
    poll: Duration,
) {
    tracing::debug!("[{}] delivery thread started", name);
    loop {
        if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }
        let next = crossbeam::select! {
            recv(stop_rx) -> _ => Poll::Stop,
            recv(rx) -> msg => msg.map_or(Poll::Stop, Poll::Item),
            default(poll) => Poll::Idle,
        };
        let update = match next {
            Poll::Stop => break,
            Poll::Idle => continue,
            Poll::Item(update) => update,
        };

        health.begin();
        let result = catch_unwind(AssertUnwindSafe(|| handler.notify(update)));
        health.end();
        delivered.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("[{}] listener failed: {:#}", name, e),
            Err(_) => tracing::error!("[{}] listener panicked", name),
        }
    }
    tracing::debug!("[{}] delivery thread stopped", name);
}

impl<H: UpdateHandler> Drop for BoundedInboundQueue<H> {
    fn drop(&mut self) {
        self.stop();
    }
}
