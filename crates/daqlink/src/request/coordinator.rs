// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply over a one-way transport.
//!
//! Each call creates an exclusive reply destination, attaches it to the
//! request, sends the request with a TTL equal to the timeout and waits on
//! the reply destination. The destination is closed on every exit path, so
//! a reply arriving after the timeout has nowhere to go.
//!
//! One request is in flight per coordinator; concurrent callers queue up
//! behind it.

use crate::codec::{self, ReplyEnvelope, RequestEnvelope};
use crate::transport::{Destination, Transport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a request that did not fail at the transport level.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome<T> {
    Reply(T),
    /// No usable reply within the timeout. Malformed replies end up here too.
    Timeout,
}

impl<T> RequestOutcome<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestOutcome::Timeout)
    }

    pub fn reply(self) -> Option<T> {
        match self {
            RequestOutcome::Reply(reply) => Some(reply),
            RequestOutcome::Timeout => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestOutcome<U> {
        match self {
            RequestOutcome::Reply(reply) => RequestOutcome::Reply(f(reply)),
            RequestOutcome::Timeout => RequestOutcome::Timeout,
        }
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    AwaitingReply,
    Replied,
    TimedOut,
}

/// Closes the reply destination when dropped.
struct ReplyDestination<'a> {
    transport: &'a dyn Transport,
    destination: Destination,
}

impl Drop for ReplyDestination<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.close(&self.destination) {
            tracing::warn!("failed to close reply destination {}: {}", self.destination, e);
        }
    }
}

/// Single-flight request/reply correlation.
pub struct RequestReplyCoordinator {
    transport: Arc<dyn Transport>,
    request_destination: Destination,
    in_flight: Mutex<()>,
    state: Mutex<RequestState>,
}

impl RequestReplyCoordinator {
    pub fn new(transport: Arc<dyn Transport>, request_destination: Destination) -> Self {
        Self {
            transport,
            request_destination,
            in_flight: Mutex::new(()),
            state: Mutex::new(RequestState::Idle),
        }
    }

    pub fn state(&self) -> RequestState {
        *self.state.lock()
    }

    pub fn request_destination(&self) -> &Destination {
        &self.request_destination
    }

    fn transition(&self, next: RequestState) {
        let mut state = self.state.lock();
        tracing::trace!("request state {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Send `request` and wait up to `timeout` for its reply.
    ///
    /// Transport failures are returned as errors. No reply, a malformed
    /// reply, or a reply to a different request type is
    /// [`RequestOutcome::Timeout`].
    pub fn send_request(
        &self,
        mut request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<RequestOutcome<ReplyEnvelope>, TransportError> {
        let _single_flight = self.in_flight.lock();

        let reply_to = ReplyDestination {
            transport: self.transport.as_ref(),
            destination: self.transport.create_reply_destination()?,
        };
        request.reply_to = Some(reply_to.destination.clone());
        let payload = codec::encode(&request)?;

        tracing::debug!(
            "sending {:?} request for {} (timeout {} ms)",
            request.request_type,
            request.process_name,
            timeout.as_millis()
        );
        self.transition(RequestState::AwaitingReply);
        let started = Instant::now();

        let result = self
            .transport
            .send(&self.request_destination, &payload, Some(timeout))
            .and_then(|()| self.transport.receive(&reply_to.destination, timeout));

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                self.transition(RequestState::Idle);
                return Err(e);
            }
        };

        let outcome = match raw {
            None => {
                tracing::warn!(
                    "no reply to {:?} request within {} ms",
                    request.request_type,
                    timeout.as_millis()
                );
                RequestOutcome::Timeout
            }
            Some(raw) => match codec::decode::<ReplyEnvelope>(&raw) {
                Ok(reply) if reply.request_type == request.request_type => {
                    tracing::debug!(
                        "{:?} reply received after {} ms",
                        reply.request_type,
                        started.elapsed().as_millis()
                    );
                    RequestOutcome::Reply(reply)
                }
                Ok(reply) => {
                    tracing::warn!(
                        "expected {:?} reply, got {:?}; ignoring it",
                        request.request_type,
                        reply.request_type
                    );
                    RequestOutcome::Timeout
                }
                Err(e) => {
                    tracing::warn!("malformed reply to {:?} request: {}", request.request_type, e);
                    RequestOutcome::Timeout
                }
            },
        };

        self.transition(if outcome.is_timeout() {
            RequestState::TimedOut
        } else {
            RequestState::Replied
        });
        drop(reply_to);
        self.transition(RequestState::Idle);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RequestType;
    use crate::identity::ProcessIdentity;
    use crate::transport::MemoryBroker;
    use std::thread;

    fn broker() -> Arc<MemoryBroker> {
        let broker = Arc::new(MemoryBroker::new());
        broker.connect().unwrap();
        broker
    }

    fn connect_request() -> RequestEnvelope {
        RequestEnvelope::new(RequestType::Connect, &ProcessIdentity::unconnected("P_TEST"))
    }

    /// Answer the next request on `requests` after `delay`, with `payload`.
    fn respond_once(
        broker: Arc<MemoryBroker>,
        delay: Duration,
        reply: impl FnOnce(RequestEnvelope) -> Vec<u8> + Send + 'static,
    ) -> thread::JoinHandle<Result<(), TransportError>> {
        thread::spawn(move || {
            let raw = broker
                .receive(&"requests".into(), Duration::from_secs(5))?
                .ok_or(TransportError::Shutdown)?;
            let request: RequestEnvelope = codec::decode(&raw)?;
            thread::sleep(delay);
            let reply_to = request.reply_to.clone().ok_or(TransportError::Shutdown)?;
            broker.send(&reply_to, &reply(request), None)
        })
    }

    #[test]
    fn test_reply_within_timeout() {
        let broker = broker();
        let coordinator = RequestReplyCoordinator::new(broker.clone(), "requests".into());
        let responder = respond_once(broker.clone(), Duration::ZERO, |request| {
            let mut reply = request.reply(serde_json::Value::Null);
            reply.process_id = Some(9);
            reply.identification_token = Some(1234);
            codec::encode(&reply).unwrap()
        });

        let outcome = coordinator
            .send_request(connect_request(), Duration::from_secs(2))
            .unwrap();
        let reply = outcome.reply().unwrap();
        assert_eq!(reply.identification_token, Some(1234));
        assert!(responder.join().unwrap().is_ok());
        assert_eq!(broker.open_reply_destinations(), 0);
        assert_eq!(coordinator.state(), RequestState::Idle);
    }

    #[test]
    fn test_no_responder_times_out() {
        let broker = broker();
        let coordinator = RequestReplyCoordinator::new(broker.clone(), "requests".into());
        let start = Instant::now();
        let outcome = coordinator
            .send_request(connect_request(), Duration::from_millis(150))
            .unwrap();

        assert!(outcome.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(broker.open_reply_destinations(), 0);
    }

    #[test]
    fn test_late_reply_is_discarded() {
        let broker = broker();
        let coordinator = RequestReplyCoordinator::new(broker.clone(), "requests".into());
        let responder = respond_once(broker.clone(), Duration::from_millis(300), |request| {
            codec::encode(&request.reply(serde_json::Value::Null)).unwrap()
        });

        let outcome = coordinator
            .send_request(connect_request(), Duration::from_millis(100))
            .unwrap();
        assert!(outcome.is_timeout());

        let late = responder.join().unwrap();
        assert!(matches!(late, Err(TransportError::DestinationClosed(_))));
    }

    #[test]
    fn test_malformed_reply_is_timeout() {
        let broker = broker();
        let coordinator = RequestReplyCoordinator::new(broker.clone(), "requests".into());
        let responder = respond_once(broker.clone(), Duration::ZERO, |_| b"<garbage".to_vec());

        let outcome = coordinator
            .send_request(connect_request(), Duration::from_secs(2))
            .unwrap();
        assert!(outcome.is_timeout());
        assert!(responder.join().unwrap().is_ok());
        assert_eq!(broker.open_reply_destinations(), 0);
    }

    #[test]
    fn test_send_failure_propagates() {
        let broker = Arc::new(MemoryBroker::new());
        let coordinator = RequestReplyCoordinator::new(broker, "requests".into());
        let err = coordinator
            .send_request(connect_request(), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert_eq!(coordinator.state(), RequestState::Idle);
    }

    #[test]
    fn test_request_carries_ttl() {
        let broker = broker();
        let coordinator = RequestReplyCoordinator::new(broker.clone(), "requests".into());
        coordinator
            .send_request(connect_request(), Duration::from_millis(20))
            .unwrap();

        // The unanswered request has outlived its TTL on the broker.
        thread::sleep(Duration::from_millis(30));
        let leftover = broker
            .receive(&"requests".into(), Duration::ZERO)
            .unwrap();
        assert!(leftover.is_none());
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let broker = broker();
        let coordinator = Arc::new(RequestReplyCoordinator::new(
            broker.clone(),
            "requests".into(),
        ));

        // Answers every request; records the largest number of reply
        // destinations open at once.
        let server = {
            let broker = broker.clone();
            thread::spawn(move || {
                let mut max_open = 0;
                for _ in 0..3 {
                    let raw = broker
                        .receive(&"requests".into(), Duration::from_secs(5))
                        .unwrap()
                        .unwrap();
                    max_open = max_open.max(broker.open_reply_destinations());
                    let request: RequestEnvelope = codec::decode(&raw).unwrap();
                    let reply = codec::encode(&request.reply(serde_json::Value::Null)).unwrap();
                    broker.send(&request.reply_to.unwrap(), &reply, None).unwrap();
                }
                max_open
            })
        };

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    coordinator
                        .send_request(connect_request(), Duration::from_secs(5))
                        .unwrap()
                })
            })
            .collect();
        for caller in callers {
            assert!(!caller.join().unwrap().is_timeout());
        }
        assert_eq!(server.join().unwrap(), 1);
    }
}
