// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time/size windowed batching buffer.
//!
//! Pushed items accumulate in a window. A trigger thread hands the window
//! to the flush listener as soon as it holds `min_size` items, or once
//! `max_delay` has passed since the first item arrived, whichever is first.
//! One flush delivers at most `max_window` items.
//!
//! No deduplication is performed: an item pushed twice is flushed twice.

use crate::error::Result;
use crate::worker::StopHandle;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Flush thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Flush as soon as this many items are waiting.
    pub min_size: usize,
    /// Flush at the latest this long after the window became non-empty.
    pub max_delay: Duration,
    /// Most items delivered by one flush.
    pub max_window: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            min_size: 200,
            max_delay: Duration::from_millis(1000),
            max_window: 10_000,
        }
    }
}

/// Receives flushed windows, on the buffer's trigger thread.
pub trait FlushListener<T>: Send + Sync {
    fn on_flush(&self, items: Vec<T>);
}

impl<T, F> FlushListener<T> for F
where
    F: Fn(Vec<T>) + Send + Sync,
{
    fn on_flush(&self, items: Vec<T>) {
        self(items)
    }
}

struct Window<T> {
    items: Vec<T>,
    /// When the window last became non-empty.
    since: Option<Instant>,
    enabled: bool,
    closed: bool,
}

struct Shared<T> {
    window: Mutex<Window<T>>,
    wake: Condvar,
    pushed: AtomicU64,
    flushes: AtomicU64,
    flushed_items: AtomicU64,
}

/// Buffer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub pushed: u64,
    pub flushes: u64,
    pub flushed_items: u64,
    pub pending: usize,
}

/// Batching buffer with its own trigger thread.
///
/// Created disabled: items accumulate but nothing is flushed until
/// [`enable`](Self::enable).
pub struct BatchingBuffer<T: Send + 'static> {
    name: String,
    config: BufferConfig,
    shared: Arc<Shared<T>>,
    listener: Arc<dyn FlushListener<T>>,
    trigger: Mutex<Option<StopHandle>>,
}

impl<T: Send + 'static> BatchingBuffer<T> {
    pub fn new(
        name: impl Into<String>,
        config: BufferConfig,
        listener: Arc<dyn FlushListener<T>>,
    ) -> Result<Self> {
        let name = name.into();
        let config = BufferConfig {
            min_size: config.min_size.max(1),
            max_window: config.max_window.max(1),
            ..config
        };
        let shared = Arc::new(Shared {
            window: Mutex::new(Window {
                items: Vec::new(),
                since: None,
                enabled: false,
                closed: false,
            }),
            wake: Condvar::new(),
            pushed: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            flushed_items: AtomicU64::new(0),
        });

        let trigger = {
            let shared = Arc::clone(&shared);
            let listener = Arc::clone(&listener);
            let name = name.clone();
            StopHandle::spawn(format!("daqlink-buffer-{}", name), move |_stop_rx| {
                trigger_loop(&name, config, &shared, listener.as_ref())
            })?
        };

        Ok(Self {
            name,
            config,
            shared,
            listener,
            trigger: Mutex::new(Some(trigger)),
        })
    }

    /// Append an item. Never blocks on a flush in progress.
    pub fn push(&self, item: T) {
        let mut window = self.shared.window.lock();
        if window.closed {
            tracing::warn!("[{}] push after close, item dropped", self.name);
            return;
        }
        window.items.push(item);
        if window.since.is_none() {
            window.since = Some(Instant::now());
        }
        self.shared.pushed.fetch_add(1, Ordering::Relaxed);
        let len = window.items.len();
        drop(window);

        if len == 1 || len >= self.config.min_size {
            self.shared.wake.notify_one();
        }
    }

    pub fn enable(&self) {
        self.shared.window.lock().enabled = true;
        self.shared.wake.notify_one();
        tracing::debug!("[{}] enabled", self.name);
    }

    pub fn disable(&self) {
        self.shared.window.lock().enabled = false;
        tracing::debug!("[{}] disabled", self.name);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.window.lock().enabled
    }

    /// Items waiting for the next flush.
    pub fn len(&self) -> usize {
        self.shared.window.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> BufferConfig {
        self.config
    }

    /// Stop the trigger thread, then flush whatever is left on the calling
    /// thread, enabled or not. Later pushes are dropped.
    pub fn close(&self) {
        let Some(mut trigger) = self.trigger.lock().take() else {
            return;
        };
        self.shared.window.lock().closed = true;
        self.shared.wake.notify_all();
        trigger.stop();

        let remaining = {
            let mut window = self.shared.window.lock();
            window.since = None;
            std::mem::take(&mut window.items)
        };
        if !remaining.is_empty() {
            tracing::debug!("[{}] final flush of {} items", self.name, remaining.len());
        }
        let mut remaining = remaining.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<T> = remaining.by_ref().take(self.config.max_window).collect();
            deliver(&self.name, &self.shared, self.listener.as_ref(), chunk);
        }
        tracing::debug!("[{}] closed", self.name);
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pushed: self.shared.pushed.load(Ordering::Relaxed),
            flushes: self.shared.flushes.load(Ordering::Relaxed),
            flushed_items: self.shared.flushed_items.load(Ordering::Relaxed),
            pending: self.len(),
        }
    }
}

impl<T: Send + 'static> Drop for BatchingBuffer<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn trigger_loop<T>(
    name: &str,
    config: BufferConfig,
    shared: &Shared<T>,
    listener: &dyn FlushListener<T>,
) {
    let mut window = shared.window.lock();
    loop {
        if window.closed {
            return;
        }

        let due = window
            .since
            .map(|since| since + config.max_delay)
            .filter(|_| window.enabled);
        let ready = window.enabled
            && (window.items.len() >= config.min_size
                || due.is_some_and(|due| due <= Instant::now()));

        if ready {
            let take = window.items.len().min(config.max_window);
            let batch: Vec<T> = window.items.drain(..take).collect();
            window.since = (!window.items.is_empty()).then(Instant::now);
            drop(window);

            deliver(name, shared, listener, batch);
            window = shared.window.lock();
            continue;
        }

        match due {
            Some(due) => {
                shared.wake.wait_until(&mut window, due);
            }
            None => shared.wake.wait(&mut window),
        }
    }
}

fn deliver<T>(name: &str, shared: &Shared<T>, listener: &dyn FlushListener<T>, batch: Vec<T>) {
    let size = batch.len() as u64;
    tracing::trace!("[{}] flushing {} items", name, size);
    shared.flushes.fetch_add(1, Ordering::Relaxed);
    shared.flushed_items.fetch_add(size, Ordering::Relaxed);
    if catch_unwind(AssertUnwindSafe(|| listener.on_flush(batch))).is_err() {
        tracing::error!("[{}] flush listener panicked, {} items lost", name, size);
    }
}
