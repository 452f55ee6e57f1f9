// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport listener thread feeding a [`BoundedInboundQueue`].

use super::queue::{BoundedInboundQueue, UpdateHandler};
use crate::error::Result;
use crate::transport::{Destination, Transport};
use crate::worker::StopHandle;
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Pulls messages from one destination and hands them to a queue.
///
/// The thread blocks inside `on_message` whenever the queue is full, so a
/// slow handler slows down consumption from the broker.
pub struct Subscription {
    destination: Destination,
    worker: Mutex<Option<StopHandle>>,
}

impl Subscription {
    /// Start listening on `destination`.
    pub fn spawn<H: UpdateHandler>(
        transport: Arc<dyn Transport>,
        destination: Destination,
        queue: Arc<BoundedInboundQueue<H>>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let dest = destination.clone();
        let worker = StopHandle::spawn(format!("daqlink-sub-{}", destination), move |stop_rx| {
            listen(transport.as_ref(), &dest, &queue, poll_interval, &stop_rx)
        })?;
        tracing::info!("subscribed to {}", destination);

        Ok(Self {
            destination,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Stop listening. Returns once the listener thread has exited.
    pub fn stop(&self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stop();
            tracing::info!("unsubscribed from {}", self.destination);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen<H: UpdateHandler>(
    transport: &dyn Transport,
    destination: &Destination,
    queue: &BoundedInboundQueue<H>,
    poll_interval: Duration,
    stop_rx: &Receiver<()>,
) {
    while let Err(TryRecvError::Empty) = stop_rx.try_recv() {
        match transport.receive(destination, poll_interval) {
            Ok(Some(raw)) => queue.on_message(&raw),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("receive on {} failed: {}", destination, e);
                // Back off, but wake immediately on stop.
                if !matches!(
                    stop_rx.recv_timeout(poll_interval),
                    Err(RecvTimeoutError::Timeout)
                ) {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBroker;
    use std::time::Instant;

    struct Collect(Mutex<Vec<String>>);

    impl UpdateHandler for Collect {
        type Update = String;

        fn decode(&self, raw: &[u8]) -> anyhow::Result<String> {
            Ok(String::from_utf8(raw.to_vec())?)
        }

        fn describe(&self, update: &String) -> String {
            update.clone()
        }

        fn notify(&self, update: String) -> anyhow::Result<()> {
            self.0.lock().push(update);
            Ok(())
        }
    }

    #[test]
    fn test_messages_flow_to_handler() {
        let broker = Arc::new(MemoryBroker::new());
        broker.connect().unwrap();
        let handler = Arc::new(Collect(Mutex::new(Vec::new())));
        let queue = Arc::new(
            BoundedInboundQueue::new("sub", handler.clone(), 8)
                .with_poll_interval(Duration::from_millis(10)),
        );
        queue.start().unwrap();
        let sub = Subscription::spawn(
            broker.clone(),
            "topic".into(),
            queue.clone(),
            Duration::from_millis(10),
        )
        .unwrap();

        broker.send(&"topic".into(), b"a", None).unwrap();
        broker.send(&"topic".into(), b"b", None).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.0.lock().len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*handler.0.lock(), vec!["a".to_string(), "b".to_string()]);

        sub.stop();
        queue.stop();
    }

    #[test]
    fn test_stop_while_disconnected() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(BoundedInboundQueue::new(
            "down",
            Arc::new(Collect(Mutex::new(Vec::new()))),
            8,
        ));
        let sub = Subscription::spawn(broker, "topic".into(), queue, Duration::from_millis(10))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        sub.stop();
    }
}
