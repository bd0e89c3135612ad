//! A single publish unit flowing generator -> publisher -> client.

use bytes::Bytes;
use std::time::Instant;

use crate::transport::QoS;

/// Owned by exactly one pipeline stage at a time; channel handoffs move it.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub qos: QoS,
    /// Shared view of the client's payload; cloning is a refcount bump
    pub payload: Bytes,
    sent: Option<Instant>,
    delivered: Option<Instant>,
    error: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, qos: QoS, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            qos,
            payload,
            sent: None,
            delivered: None,
            error: false,
        }
    }

    /// Stamp the send time right before the publish call.
    pub fn mark_sent(&mut self, at: Instant) {
        self.sent = Some(at);
    }

    pub fn mark_delivered(&mut self, at: Instant) {
        self.delivered = Some(at);
        self.error = false;
    }

    pub fn mark_failed(&mut self) {
        self.delivered = None;
        self.error = true;
    }

    pub fn sent(&self) -> Option<Instant> {
        self.sent
    }

    pub fn delivered(&self) -> Option<Instant> {
        self.delivered
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Publish-to-ack time in milliseconds, `None` unless delivered.
    pub fn latency_ms(&self) -> Option<f64> {
        match (self.sent, self.delivered) {
            (Some(sent), Some(delivered)) if !self.error => {
                Some(delivered.saturating_duration_since(sent).as_secs_f64() * 1000.0)
            }
            _ => None,
        }
    }
}
