//! ---
//! vms_section: "02-messaging-protocol"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Layer types, wire codec, and channel adapter."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::codec::VmsMessage;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message written to the shared channel.
    Outbound,
    /// Message decoded from the shared channel.
    Inbound,
    /// Message written after at least one failed attempt.
    Retry,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, message: &VmsMessage) {
    match message {
        VmsMessage::Data { layer, payload } => debug!(
            kind = message.kind(),
            direction = ?direction,
            layer = %layer,
            payload_len = payload.len(),
            "messaging activity"
        ),
        VmsMessage::Offering(offerings) => debug!(
            kind = message.kind(),
            direction = ?direction,
            offerings = offerings.len(),
            "messaging activity"
        ),
        VmsMessage::SubscriptionResponse {
            sequence_number,
            layers,
        } => debug!(
            kind = message.kind(),
            direction = ?direction,
            sequence_number,
            layers = layers.len(),
            "messaging activity"
        ),
        other => debug!(
            kind = other.kind(),
            direction = ?direction,
            layer = ?other.layer(),
            "messaging activity"
        ),
    }
}

/// Prometheus metric handles for bus activity.
pub struct MessagingMetrics {
    received: IntCounterVec,
    sent: IntCounterVec,
    malformed: IntCounter,
    write_failures: IntCounter,
    data_delivered: IntCounter,
    data_dropped: IntCounter,
    availability_changes: IntCounter,
}

impl MessagingMetrics {
    /// Register bus metrics under `namespace` with the provided registry.
    pub fn register(registry: &Registry, namespace: &str) -> Result<Self, prometheus::Error> {
        let received = IntCounterVec::new(
            Opts::new(
                "messages_received_total",
                "Messages decoded from the shared channel",
            )
            .namespace(namespace),
            &["kind"],
        )?;
        let sent = IntCounterVec::new(
            Opts::new("messages_sent_total", "Messages written to the shared channel")
                .namespace(namespace),
            &["kind"],
        )?;
        let malformed = IntCounter::with_opts(
            Opts::new(
                "malformed_messages_total",
                "Inbound values dropped because they could not be decoded",
            )
            .namespace(namespace),
        )?;
        let write_failures = IntCounter::with_opts(
            Opts::new(
                "channel_write_failures_total",
                "Writes that failed after every configured attempt",
            )
            .namespace(namespace),
        )?;
        let data_delivered = IntCounter::with_opts(
            Opts::new(
                "data_delivered_total",
                "DATA messages handed to listeners",
            )
            .namespace(namespace),
        )?;
        let data_dropped = IntCounter::with_opts(
            Opts::new(
                "data_dropped_total",
                "DATA messages dropped for unsubscribed layers",
            )
            .namespace(namespace),
        )?;
        let availability_changes = IntCounter::with_opts(
            Opts::new(
                "availability_changes_total",
                "Availability set changes propagated to listeners",
            )
            .namespace(namespace),
        )?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(malformed.clone()))?;
        registry.register(Box::new(write_failures.clone()))?;
        registry.register(Box::new(data_delivered.clone()))?;
        registry.register(Box::new(data_dropped.clone()))?;
        registry.register(Box::new(availability_changes.clone()))?;

        Ok(Self {
            received,
            sent,
            malformed,
            write_failures,
            data_delivered,
            data_dropped,
            availability_changes,
        })
    }

    /// Record a decoded inbound message.
    pub fn observe_received(&self, kind: &str) {
        self.received.with_label_values(&[kind]).inc();
    }

    /// Record a successful write.
    pub fn observe_sent(&self, kind: &str) {
        self.sent.with_label_values(&[kind]).inc();
    }

    /// Record an undecodable inbound value.
    pub fn observe_malformed(&self) {
        self.malformed.inc();
    }

    /// Record a write that exhausted its attempts.
    pub fn observe_write_failure(&self) {
        self.write_failures.inc();
    }

    /// Record a DATA message handed to listeners.
    pub fn observe_data_delivered(&self) {
        self.data_delivered.inc();
    }

    /// Record a DATA message dropped by subscription gating.
    pub fn observe_data_dropped(&self) {
        self.data_dropped.inc();
    }

    /// Record an availability change notification.
    pub fn observe_availability_change(&self) {
        self.availability_changes.inc();
    }
}
