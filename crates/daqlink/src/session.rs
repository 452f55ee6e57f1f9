// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DAQ process session.
//!
//! Wires the components together and drives the process lifecycle:
//!
//! 1. connect the transport
//! 2. connect handshake; the granted id and token become the identity
//! 3. fetch the configuration
//! 4. connect the senders, enable the buffers, start the alive timer
//!
//! [`DaqSession::shutdown`] undoes this in reverse, flushing whatever is
//! still buffered before the disconnect notification goes out.

use crate::codec::{ConfigurationReply, ConfigurationStatus};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::identity::{ProcessIdentity, SharedIdentity};
use crate::liveness::LivenessPublisher;
use crate::outbound::OutboundDispatcher;
use crate::request::{ProcessRequestSender, RequestOutcome};
use crate::transport::{Destination, Transport, TransportSender};
use crate::update::SourceUpdate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A connected DAQ process.
pub struct DaqSession {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    identity: SharedIdentity,
    dispatcher: Arc<OutboundDispatcher>,
    requests: ProcessRequestSender,
    liveness: LivenessPublisher,
    starting: AtomicBool,
    started: AtomicBool,
    shut_down: AtomicBool,
}

impl DaqSession {
    /// Build the components. Nothing is sent until [`start`](Self::start).
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let identity = SharedIdentity::new(ProcessIdentity::unconnected(&config.process.name));
        let dispatcher = Arc::new(OutboundDispatcher::new(
            config.dispatcher_config(),
            identity.clone(),
        )?);
        dispatcher.add_sender(Arc::new(TransportSender::new(
            "primary",
            transport.clone(),
            Destination::new(&config.transport.update_destination),
            config.outbound.max_message_bytes,
        )));

        let requests = ProcessRequestSender::new(
            transport.clone(),
            Destination::new(&config.transport.request_destination),
            identity.clone(),
            config.request_timeout(),
        )
        .with_connect_timeout(config.connect_timeout());

        let liveness = LivenessPublisher::new(dispatcher.clone(), config.alive_interval());

        Ok(Self {
            config,
            transport,
            identity,
            dispatcher,
            requests,
            liveness,
            starting: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Run the startup sequence. Returns the configuration handed out by
    /// the server.
    ///
    /// Fails with [`LinkError::AlreadyStarted`] while a startup is running
    /// or has succeeded. A failed startup may be retried.
    pub fn start(&self) -> Result<ConfigurationReply> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(LinkError::AlreadyStopped);
        }
        if self.starting.swap(true, Ordering::AcqRel) {
            return Err(LinkError::AlreadyStarted);
        }

        let result = self.run_startup();
        if result.is_err() {
            self.starting.store(false, Ordering::Release);
        }
        result
    }

    fn run_startup(&self) -> Result<ConfigurationReply> {
        self.transport.connect()?;
        tracing::info!("process {} connecting to server", self.config.process.name);

        let connection = match self.requests.connect()? {
            RequestOutcome::Reply(reply) => reply,
            RequestOutcome::Timeout => {
                return Err(LinkError::ConnectTimeout(self.config.transport.connect_timeout_ms))
            }
        };
        let Some((process_id, token)) = connection.grant() else {
            tracing::error!(
                "connection of {} rejected; another instance may be running",
                self.config.process.name
            );
            return Err(LinkError::ConnectionRejected(self.config.process.name.clone()));
        };
        self.identity.assign(process_id, token);
        tracing::info!("process {} connected with id {}", self.config.process.name, process_id);

        let configuration = match self.requests.get_configuration()? {
            RequestOutcome::Reply(reply) => reply,
            RequestOutcome::Timeout => {
                return Err(LinkError::ConfigurationTimeout(
                    self.config.transport.request_timeout_ms,
                ))
            }
        };
        if configuration.status != ConfigurationStatus::Ok {
            return Err(LinkError::ConfigurationRejected(format!(
                "{:?}: {}",
                configuration.status, configuration.configuration
            )));
        }

        self.dispatcher.connect()?;
        self.dispatcher.enable();
        self.liveness.start()?;
        self.started.store(true, Ordering::Release);
        tracing::info!("process {} started", self.config.process.name);

        Ok(configuration)
    }

    /// Queue one value for publication.
    pub fn add_value(&self, update: SourceUpdate) {
        self.dispatcher.add_value(update);
    }

    pub fn dispatcher(&self) -> &Arc<OutboundDispatcher> {
        &self.dispatcher
    }

    pub fn identity(&self) -> Arc<ProcessIdentity> {
        self.identity.load()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shut_down.load(Ordering::Acquire)
    }

    /// Stop publishing and say goodbye to the server. Runs once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("shutting down process {}", self.config.process.name);

        self.liveness.stop();
        self.dispatcher.close_buffers();
        if let Err(e) = self.requests.disconnect() {
            tracing::warn!("disconnection notification failed: {}", e);
        }
        self.dispatcher.shutdown();
        self.identity.clear();
    }
}

impl Drop for DaqSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, RequestEnvelope, RequestType};
    use crate::transport::MemoryBroker;
    use std::thread;
    use std::time::Duration;

    fn test_config() -> LinkConfig {
        let mut config = LinkConfig::for_process("P_TEST");
        config.transport.connect_timeout_ms = 300;
        config.transport.request_timeout_ms = 300;
        config
    }

    /// Answer `count` requests: grant connections when `grant` is set and
    /// hand out `status` for configuration requests.
    fn server(
        broker: Arc<MemoryBroker>,
        count: usize,
        grant: bool,
        status: ConfigurationStatus,
    ) -> thread::JoinHandle<Vec<RequestType>> {
        broker.connect().unwrap();
        thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < count {
                let Some(raw) = broker
                    .receive(&"daq.process.request".into(), Duration::from_secs(5))
                    .unwrap()
                else {
                    break;
                };
                let request: RequestEnvelope = codec::decode(&raw).unwrap();
                seen.push(request.request_type);
                let reply = match request.request_type {
                    RequestType::Connect => {
                        let mut reply = request.reply(serde_json::Value::Null);
                        if grant {
                            reply.process_id = Some(4);
                            reply.identification_token = Some(777);
                        }
                        reply
                    }
                    RequestType::Configuration => request.reply(serde_json::json!({
                        "status": status,
                        "configuration": "<config/>",
                    })),
                    RequestType::Disconnect => continue,
                };
                if let Some(reply_to) = &request.reply_to {
                    broker.send(reply_to, &codec::encode(&reply).unwrap(), None).unwrap();
                }
            }
            seen
        })
    }

    #[test]
    fn test_startup_and_shutdown() {
        let broker = Arc::new(MemoryBroker::new());
        let responder = server(broker.clone(), 3, true, ConfigurationStatus::Ok);
        let session = DaqSession::new(test_config(), broker.clone()).unwrap();

        let configuration = session.start().unwrap();
        assert_eq!(configuration.configuration, "<config/>");
        assert!(session.is_started());
        let identity = session.identity();
        assert_eq!(identity.process_id, Some(4));
        assert_eq!(identity.identification_token, Some(777));

        session.shutdown();
        session.shutdown();
        assert!(!session.is_started());
        assert_eq!(
            responder.join().unwrap(),
            vec![RequestType::Connect, RequestType::Configuration, RequestType::Disconnect]
        );
        // The first alive tag went out on start.
        assert!(broker.pending(&"daq.process.update".into()) >= 1);
    }

    #[test]
    fn test_second_start_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let responder = server(broker.clone(), 3, true, ConfigurationStatus::Ok);
        let session = DaqSession::new(test_config(), broker).unwrap();

        session.start().unwrap();
        assert!(matches!(session.start(), Err(LinkError::AlreadyStarted)));
        assert_eq!(session.identity().process_id, Some(4));
        assert!(session.is_started());

        session.shutdown();
        assert_eq!(
            responder.join().unwrap(),
            vec![RequestType::Connect, RequestType::Configuration, RequestType::Disconnect]
        );
    }

    #[test]
    fn test_connect_timeout() {
        let broker = Arc::new(MemoryBroker::new());
        let session = DaqSession::new(test_config(), broker).unwrap();
        assert!(matches!(session.start(), Err(LinkError::ConnectTimeout(300))));
    }

    #[test]
    fn test_connection_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let responder = server(broker.clone(), 1, false, ConfigurationStatus::Ok);
        let session = DaqSession::new(test_config(), broker).unwrap();
        assert!(matches!(
            session.start(),
            Err(LinkError::ConnectionRejected(name)) if name == "P_TEST"
        ));
        responder.join().unwrap();
    }

    #[test]
    fn test_configuration_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let responder = server(broker.clone(), 2, true, ConfigurationStatus::Rejected);
        let session = DaqSession::new(test_config(), broker).unwrap();
        assert!(matches!(session.start(), Err(LinkError::ConfigurationRejected(_))));
        responder.join().unwrap();
    }

    #[test]
    fn test_no_restart_after_shutdown() {
        let broker = Arc::new(MemoryBroker::new());
        let session = DaqSession::new(test_config(), broker).unwrap();
        session.shutdown();
        assert!(matches!(session.start(), Err(LinkError::AlreadyStopped)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.outbound.max_batch_size = 0;
        let broker = Arc::new(MemoryBroker::new());
        assert!(matches!(
            DaqSession::new(config, broker),
            Err(LinkError::Config(_))
        ));
    }
}
