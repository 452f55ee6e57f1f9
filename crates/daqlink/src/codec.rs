// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON envelopes exchanged with the server.
//!
//! Lifecycle requests and their replies share one envelope shape:
//! `{request_type, process_name, process_id, identification_token, payload}`.
//! Telemetry goes out as a serialized [`UpdateBatch`].

use crate::identity::ProcessIdentity;
use crate::transport::Destination;
use crate::update::UpdateBatch;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Process id used when the server never assigned one.
pub const NO_ID: i64 = -1;
/// Process name used when the name is unknown.
pub const NO_PROCESS: &str = "NO_PROCESS";
/// Identification token used when none was assigned.
pub const NO_PIK: i64 = -1;

/// Kind of lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Connect,
    Configuration,
    Disconnect,
}

/// Lifecycle request sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_type: RequestType,
    pub process_name: String,
    #[serde(default)]
    pub process_id: Option<i64>,
    #[serde(default)]
    pub identification_token: Option<i64>,
    #[serde(default)]
    pub startup_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Ephemeral destination the reply must be sent to.
    #[serde(default)]
    pub reply_to: Option<Destination>,
}

impl RequestEnvelope {
    /// Request carrying the given identity.
    pub fn new(request_type: RequestType, identity: &ProcessIdentity) -> Self {
        Self {
            request_type,
            process_name: identity.process_name.clone(),
            process_id: identity.process_id,
            identification_token: identity.identification_token,
            startup_time: None,
            payload: serde_json::Value::Null,
            reply_to: None,
        }
    }

    pub fn with_startup_time(mut self, startup_time: DateTime<Utc>) -> Self {
        self.startup_time = Some(startup_time);
        self
    }

    /// Build the reply envelope answering this request.
    pub fn reply(&self, payload: serde_json::Value) -> ReplyEnvelope {
        ReplyEnvelope {
            request_type: self.request_type,
            process_name: self.process_name.clone(),
            process_id: self.process_id,
            identification_token: self.identification_token,
            payload,
        }
    }
}

/// Reply to a lifecycle request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub request_type: RequestType,
    pub process_name: String,
    #[serde(default)]
    pub process_id: Option<i64>,
    #[serde(default)]
    pub identification_token: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outcome of a configuration request as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    Ok,
    Rejected,
    Unknown,
}

/// Payload of a configuration reply. The configuration text is opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationReply {
    pub status: ConfigurationStatus,
    #[serde(default)]
    pub configuration: String,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn encode_batch(batch: &UpdateBatch) -> Result<Vec<u8>, serde_json::Error> {
    encode(batch)
}

pub fn decode_batch(bytes: &[u8]) -> Result<UpdateBatch, serde_json::Error> {
    decode(bytes)
}
