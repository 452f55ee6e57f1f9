// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process lifecycle handshakes: connect, get configuration, disconnect.

use super::coordinator::{RequestOutcome, RequestReplyCoordinator};
use crate::codec::{
    self, ConfigurationReply, RequestEnvelope, RequestType, NO_ID, NO_PIK, NO_PROCESS,
};
use crate::identity::SharedIdentity;
use crate::transport::{Destination, Transport, TransportError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Fixed timeout of the connect handshake. The configured request timeout
/// is not known until the configuration has been fetched.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// What the server answered to a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionReply {
    pub process_id: Option<i64>,
    pub identification_token: Option<i64>,
}

impl ConnectionReply {
    /// Id and token, if the server granted the connection.
    pub fn grant(&self) -> Option<(i64, i64)> {
        Some((self.process_id?, self.identification_token?))
    }
}

/// Lifecycle requests of one DAQ process.
pub struct ProcessRequestSender {
    coordinator: RequestReplyCoordinator,
    transport: Arc<dyn Transport>,
    identity: SharedIdentity,
    connect_timeout: Duration,
    request_timeout: Duration,
    startup_time: DateTime<Utc>,
}

impl ProcessRequestSender {
    pub fn new(
        transport: Arc<dyn Transport>,
        request_destination: Destination,
        identity: SharedIdentity,
        request_timeout: Duration,
    ) -> Self {
        Self {
            coordinator: RequestReplyCoordinator::new(transport.clone(), request_destination),
            transport,
            identity,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout,
            startup_time: Utc::now(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn startup_time(&self) -> DateTime<Utc> {
        self.startup_time
    }

    /// Ask the server for a process id and identification token.
    ///
    /// The identity is not modified; the caller decides what to do with
    /// the grant.
    pub fn connect(&self) -> Result<RequestOutcome<ConnectionReply>, TransportError> {
        let request = RequestEnvelope::new(RequestType::Connect, &self.identity.load())
            .with_startup_time(self.startup_time);
        let outcome = self.coordinator.send_request(request, self.connect_timeout)?;
        Ok(outcome.map(|reply| ConnectionReply {
            process_id: reply.process_id,
            identification_token: reply.identification_token,
        }))
    }

    /// Fetch the process configuration, presenting the current token.
    pub fn get_configuration(&self) -> Result<RequestOutcome<ConfigurationReply>, TransportError> {
        let request = RequestEnvelope::new(RequestType::Configuration, &self.identity.load());
        let outcome = self.coordinator.send_request(request, self.request_timeout)?;

        Ok(match outcome {
            RequestOutcome::Reply(reply) => {
                match serde_json::from_value::<ConfigurationReply>(reply.payload) {
                    Ok(configuration) => RequestOutcome::Reply(configuration),
                    Err(e) => {
                        tracing::warn!("malformed configuration reply: {}", e);
                        RequestOutcome::Timeout
                    }
                }
            }
            RequestOutcome::Timeout => RequestOutcome::Timeout,
        })
    }

    /// Notify the server that this process is going away. No reply is
    /// expected. Unknown fields are sent as sentinels.
    pub fn disconnect(&self) -> Result<(), TransportError> {
        let identity = self.identity.load();
        let process_name = if identity.process_name.is_empty() {
            NO_PROCESS.to_string()
        } else {
            identity.process_name.clone()
        };
        let request = RequestEnvelope {
            request_type: RequestType::Disconnect,
            process_name,
            process_id: Some(identity.process_id.unwrap_or(NO_ID)),
            identification_token: Some(identity.identification_token.unwrap_or(NO_PIK)),
            startup_time: Some(self.startup_time),
            payload: serde_json::Value::Null,
            reply_to: None,
        };

        tracing::debug!("sending disconnection notification for {}", request.process_name);
        let payload = codec::encode(&request)?;
        self.transport.send(
            self.coordinator.request_destination(),
            &payload,
            Some(self.request_timeout),
        )
    }
}
