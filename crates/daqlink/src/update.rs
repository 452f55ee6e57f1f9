// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source value updates and the batches they travel in.
//!
//! A [`SourceUpdate`] is one measurement taken by a DAQ process. It is built
//! once (through the `with_*` methods) and never mutated afterwards; batching
//! and fan-out only ever clone or move it.
//!
//! # Expiry
//!
//! Every update carries a [`TimeToLive`]. An update with a finite TTL is
//! expired once `daq_timestamp + ttl < now`. A TTL of zero or less is
//! expired on arrival. [`TimeToLive::Forever`] never expires.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a data tag on the server.
pub type TagId = i64;

/// Dynamically typed measurement value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Declared kind of the value, as shown in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Long",
            Value::Float(_) => "Double",
            Value::Text(_) => "String",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Quality code reported by the acquisition layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityCode {
    Ok,
    OutOfBounds,
    ValueCorrupted,
    ConversionError,
    DataUnavailable,
    UnsupportedType,
    Unknown,
}

/// Quality descriptor attached to every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    pub code: QualityCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Quality {
    /// Valid quality.
    pub fn ok() -> Self {
        Self {
            code: QualityCode::Ok,
            description: None,
        }
    }

    /// Invalid quality with an explanation.
    pub fn invalid(code: QualityCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.code == QualityCode::Ok
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::ok()
    }
}

/// Delivery priority.
///
/// `High` updates bypass buffering and are distributed as soon as they are
/// added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Low,
}

/// Maximum age of an update before it must be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeToLive {
    /// Never expires.
    #[default]
    Forever,
    /// Expires this many milliseconds after the DAQ timestamp.
    Millis(i64),
}

impl TimeToLive {
    /// Finite TTL from a duration.
    pub fn from_duration(duration: Duration) -> Self {
        TimeToLive::Millis(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
    }

    /// Whether a value stamped at `stamped` is expired at `now`.
    pub fn is_expired(&self, stamped: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match *self {
            TimeToLive::Forever => false,
            TimeToLive::Millis(ms) if ms <= 0 => true,
            TimeToLive::Millis(ms) => stamped
                .checked_add_signed(ChronoDuration::milliseconds(ms))
                .is_some_and(|deadline| deadline < now),
        }
    }

    /// Finite TTL as a duration, `None` for `Forever` or non-positive values.
    pub fn as_duration(&self) -> Option<Duration> {
        match *self {
            TimeToLive::Millis(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            _ => None,
        }
    }
}

/// One measurement produced by a DAQ process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUpdate {
    id: TagId,
    name: String,
    #[serde(default)]
    is_control: bool,
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value_description: Option<String>,
    #[serde(default)]
    quality: Quality,
    timestamp: DateTime<Utc>,
    daq_timestamp: DateTime<Utc>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    guaranteed_delivery: bool,
    #[serde(default)]
    ttl: TimeToLive,
}

impl SourceUpdate {
    /// Create a low-priority, best-effort update stamped now.
    pub fn new(id: TagId, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            is_control: false,
            value: value.into(),
            value_description: None,
            quality: Quality::ok(),
            timestamp: now,
            daq_timestamp: now,
            priority: Priority::Low,
            guaranteed_delivery: false,
            ttl: TimeToLive::Forever,
        }
    }

    pub fn with_control(mut self, is_control: bool) -> Self {
        self.is_control = is_control;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.value_description = Some(description.into());
        self
    }

    /// Override the source timestamp. The DAQ timestamp is unchanged.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Override the DAQ timestamp used for TTL expiry.
    pub fn with_daq_timestamp(mut self, daq_timestamp: DateTime<Utc>) -> Self {
        self.daq_timestamp = daq_timestamp;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_guaranteed_delivery(mut self, guaranteed: bool) -> Self {
        self.guaranteed_delivery = guaranteed;
        self
    }

    pub fn with_ttl(mut self, ttl: TimeToLive) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_control(&self) -> bool {
        self.is_control
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_description(&self) -> Option<&str> {
        self.value_description.as_deref()
    }

    pub fn quality(&self) -> &Quality {
        &self.quality
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn daq_timestamp(&self) -> DateTime<Utc> {
        self.daq_timestamp
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_guaranteed_delivery(&self) -> bool {
        self.guaranteed_delivery
    }

    pub fn ttl(&self) -> TimeToLive {
        self.ttl
    }

    /// Check expiry against `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_expired(self.daq_timestamp, now)
    }
}

impl fmt::Display for SourceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{:?}\t{:?}",
            self.id,
            self.name,
            self.value.type_name(),
            self.value,
            self.quality.code,
            self.priority
        )
    }
}

/// A chunk of updates emitted together, tagged with the sending process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub process_id: Option<i64>,
    pub identification_token: Option<i64>,
    pub values: Vec<SourceUpdate>,
}

impl UpdateBatch {
    pub fn new(process_id: Option<i64>, identification_token: Option<i64>) -> Self {
        Self {
            process_id,
            identification_token,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, update: SourceUpdate) {
        self.values.push(update);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Guaranteed delivery if any member asked for it.
    pub fn requires_guaranteed_delivery(&self) -> bool {
        self.values.iter().any(SourceUpdate::is_guaranteed_delivery)
    }

    /// Smallest finite TTL among the members, if every member has one.
    pub fn shortest_ttl(&self) -> Option<Duration> {
        let mut shortest: Option<Duration> = None;
        for update in &self.values {
            let ttl = update.ttl().as_duration()?;
            shortest = Some(shortest.map_or(ttl, |s| s.min(ttl)));
        }
        shortest
    }
}
