// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic alive tag publication.
//!
//! The first alive tag goes out as soon as the publisher starts; after that
//! one is sent every interval, scheduled at a fixed rate so a slow send does
//! not shift later ticks.

use crate::error::{LinkError, Result};
use crate::outbound::OutboundDispatcher;
use crate::worker::StopHandle;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something that can publish the process alive tag.
pub trait AliveSink: Send + Sync + 'static {
    fn send_alive(&self);
}

impl AliveSink for OutboundDispatcher {
    fn send_alive(&self) {
        OutboundDispatcher::send_alive(self);
    }
}

enum State {
    Idle,
    Running(StopHandle),
    Stopped,
}

/// Sends the alive tag through a dispatcher at a fixed interval.
pub struct LivenessPublisher {
    sink: Arc<dyn AliveSink>,
    interval: Duration,
    state: Mutex<State>,
}

impl LivenessPublisher {
    pub fn new(sink: Arc<dyn AliveSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            state: Mutex::new(State::Idle),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the timer. Starting a running publisher does nothing; a
    /// stopped one cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            State::Running(_) => return Ok(()),
            State::Stopped => return Err(LinkError::AlreadyStopped),
            State::Idle => {}
        }

        let sink = Arc::clone(&self.sink);
        let interval = self.interval;
        let worker = StopHandle::spawn("daqlink-alive".into(), move |stop_rx| {
            tick(sink.as_ref(), interval, &stop_rx)
        })?;
        tracing::info!("alive timer started (interval {} ms)", interval.as_millis());
        *state = State::Running(worker);
        Ok(())
    }

    /// Stop the timer and wait for an in-progress send to finish.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Stopped);
        if let State::Running(mut worker) = previous {
            worker.stop();
            tracing::info!("alive timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), State::Running(_))
    }
}

impl Drop for LivenessPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick(sink: &dyn AliveSink, interval: Duration, stop_rx: &Receiver<()>) {
    let mut next = Instant::now();
    loop {
        if catch_unwind(AssertUnwindSafe(|| sink.send_alive())).is_err() {
            tracing::error!("alive tag publication panicked");
        }

        next += interval;
        let now = Instant::now();
        if next < now {
            // Fell behind; skip the missed ticks instead of bursting.
            next = now;
        }
        match stop_rx.recv_deadline(next) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl AliveSink for CountingSink {
        fn send_alive(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingSink(AtomicUsize);

    impl AliveSink for PanickingSink {
        fn send_alive(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("sender blew up");
        }
    }

    #[test]
    fn test_sends_immediately_then_periodically() {
        let sink = Arc::new(CountingSink::default());
        let publisher = LivenessPublisher::new(sink.clone(), Duration::from_millis(50));
        publisher.start().unwrap();
        assert!(publisher.is_running());

        std::thread::sleep(Duration::from_millis(230));
        publisher.stop();

        let sent = sink.0.load(Ordering::SeqCst);
        assert!((3..=6).contains(&sent), "sent {} alive tags", sent);
        assert!(!publisher.is_running());
    }

    #[test]
    fn test_stop_halts_publication() {
        let sink = Arc::new(CountingSink::default());
        let publisher = LivenessPublisher::new(sink.clone(), Duration::from_millis(20));
        publisher.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        publisher.stop();

        let after_stop = sink.0.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(sink.0.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_start_is_idempotent_but_not_restartable() {
        let sink = Arc::new(CountingSink::default());
        let publisher = LivenessPublisher::new(sink, Duration::from_secs(60));
        publisher.start().unwrap();
        publisher.start().unwrap();
        publisher.stop();
        publisher.stop();
        assert!(matches!(publisher.start(), Err(LinkError::AlreadyStopped)));
    }

    #[test]
    fn test_panicking_sink_keeps_timer_alive() {
        let sink = Arc::new(PanickingSink(AtomicUsize::new(0)));
        let publisher = LivenessPublisher::new(sink.clone(), Duration::from_millis(20));
        publisher.start().unwrap();
        std::thread::sleep(Duration::from_millis(90));
        publisher.stop();
        assert!(sink.0.load(Ordering::SeqCst) >= 2);
    }
}
