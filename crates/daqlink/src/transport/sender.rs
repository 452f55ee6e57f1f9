// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound senders registered with the dispatcher.

use super::{Destination, Transport, TransportError};
use crate::codec;
use crate::update::UpdateBatch;
use std::sync::Arc;

/// One outbound path for telemetry (primary broker, backup broker, ...).
pub trait UpdateSender: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Connect eagerly. Called once by the dispatcher before values flow.
    fn connect(&self) -> Result<(), TransportError>;

    /// Publish one unit. A single high-priority value arrives as a
    /// one-element batch.
    fn send(&self, batch: &UpdateBatch) -> Result<(), TransportError>;

    /// Release resources. Best-effort, never fails.
    fn shutdown(&self);

    /// Failures of a non-critical sender are logged quietly.
    fn is_critical(&self) -> bool {
        true
    }
}

/// [`UpdateSender`] publishing JSON batches on a [`Transport`] destination.
///
/// A batch whose encoding exceeds `max_message_bytes` is split in halves
/// until every part fits.
pub struct TransportSender {
    name: String,
    transport: Arc<dyn Transport>,
    destination: Destination,
    max_message_bytes: usize,
    critical: bool,
}

impl TransportSender {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        destination: Destination,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            destination,
            max_message_bytes,
            critical: true,
        }
    }

    /// Mark this sender as non-critical.
    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Publish `batch`, splitting it while it is too large. Every part is
    /// attempted; on failure returns the number of values lost and the
    /// first error.
    fn publish(&self, batch: &UpdateBatch) -> Option<(usize, TransportError)> {
        let bytes = match codec::encode_batch(batch) {
            Ok(bytes) => bytes,
            Err(e) => return Some((batch.len(), e.into())),
        };

        if bytes.len() > self.max_message_bytes {
            if batch.len() > 1 {
                let mid = batch.len() / 2;
                let (head, tail) = batch.values.split_at(mid);
                let mut failure: Option<(usize, TransportError)> = None;
                for part in [head, tail] {
                    let part = UpdateBatch {
                        process_id: batch.process_id,
                        identification_token: batch.identification_token,
                        values: part.to_vec(),
                    };
                    if let Some((lost, e)) = self.publish(&part) {
                        failure = Some(match failure {
                            Some((earlier, first)) => (earlier + lost, first),
                            None => (lost, e),
                        });
                    }
                }
                return failure;
            }
            tracing::warn!(
                "[{}] single value of {} bytes exceeds max message size {}",
                self.name,
                bytes.len(),
                self.max_message_bytes
            );
        }

        // Persistent batches never expire on the broker.
        let ttl = if batch.requires_guaranteed_delivery() {
            None
        } else {
            batch.shortest_ttl()
        };
        self.transport
            .send(&self.destination, &bytes, ttl)
            .err()
            .map(|e| (batch.len(), e))
    }
}

impl UpdateSender for TransportSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect()?;
        tracing::info!("[{}] connected, publishing on {}", self.name, self.destination);
        Ok(())
    }

    fn send(&self, batch: &UpdateBatch) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Ok(());
        }
        match self.publish(batch) {
            None => Ok(()),
            Some((lost, e)) if lost < batch.len() => Err(TransportError::PartialDelivery {
                lost,
                total: batch.len(),
                source: Box::new(e),
            }),
            Some((_, e)) => Err(e),
        }
    }

    fn shutdown(&self) {
        tracing::debug!("[{}] shut down", self.name);
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}
