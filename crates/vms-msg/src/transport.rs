//! ---
//! vms_section: "02-messaging-protocol"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Layer types, wire codec, and channel adapter."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use vms_common::ChannelConfig;

use crate::codec::{Codec, VmsMessage};
use crate::logging::{log_message, MessageDirection, MessagingMetrics};
use crate::MessagingError;

/// Value carried by the shared channel: integer words plus optional bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Integer words; index 0 is the message-type tag.
    pub values: Vec<i32>,
    /// Raw payload, hex encoded in JSON.
    #[serde(default, with = "hex_payload", skip_serializing_if = "Bytes::is_empty")]
    pub payload: Bytes,
}

impl RawMessage {
    /// Build a channel value.
    pub fn new(values: Vec<i32>, payload: Bytes) -> Self {
        Self { values, payload }
    }

    /// Integer-only channel value.
    pub fn from_values(values: impl Into<Vec<i32>>) -> Self {
        Self::new(values.into(), Bytes::new())
    }
}

/// Serde helper storing payload bytes as a lowercase hex string.
pub(crate) mod hex_payload {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Failure reported by the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The lower layer refused the write.
    #[error("write to channel '{channel}' failed: {reason}")]
    WriteFailed {
        /// Channel name.
        channel: &'static str,
        /// Reason supplied by the lower layer.
        reason: String,
    },
    /// The channel has been torn down.
    #[error("channel '{0}' is closed")]
    Closed(&'static str),
}

/// Outbound half of the property-style shared channel.
///
/// Inbound values are pushed by the lower layer into the dispatcher queue; see
/// `DispatcherHandle::on_channel_event` in `vms-core`.
pub trait VmsChannel: Send + Sync {
    /// Write one value to the channel.
    fn write(&self, message: &RawMessage) -> Result<(), ChannelError>;
    /// Human-readable channel name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// In-process channel that records every write. Used by tests and `vmsctl replay`.
#[derive(Clone, Default)]
pub struct InMemoryChannel {
    written: Arc<Mutex<VecDeque<RawMessage>>>,
    fail_next: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl InMemoryChannel {
    /// Create a new in-memory channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Reject every further write with [`ChannelError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Pop the oldest recorded write.
    pub fn pop_written(&self) -> Option<RawMessage> {
        self.written.lock().pop_front()
    }

    /// Drain every recorded write.
    pub fn take_written(&self) -> Vec<RawMessage> {
        self.written.lock().drain(..).collect()
    }

    /// Number of recorded writes not yet taken.
    pub fn written_len(&self) -> usize {
        self.written.lock().len()
    }
}

impl VmsChannel for InMemoryChannel {
    fn write(&self, message: &RawMessage) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed(self.name()));
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChannelError::WriteFailed {
                channel: self.name(),
                reason: "injected failure".into(),
            });
        }
        self.written.lock().push_back(message.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Wraps the shared channel: encodes, serializes and retries outbound writes.
pub struct ChannelAdapter {
    channel: Arc<dyn VmsChannel>,
    codec: Codec,
    config: ChannelConfig,
    metrics: Option<Arc<MessagingMetrics>>,
    write_lock: Mutex<()>,
}

impl ChannelAdapter {
    /// Wrap a channel with the given retry configuration.
    pub fn new(channel: Arc<dyn VmsChannel>, codec: Codec, config: ChannelConfig) -> Self {
        Self {
            channel,
            codec,
            config,
            metrics: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Attach metrics handles.
    pub fn with_metrics(mut self, metrics: Arc<MessagingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Codec used for both directions on this channel.
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Name of the wrapped channel.
    pub fn name(&self) -> &'static str {
        self.channel.name()
    }

    /// Encode and write a message. A closed channel is never retried.
    pub fn send(&self, message: &VmsMessage) -> crate::Result<()> {
        let raw = self.codec.encode(message)?;
        let _serialized = self.write_lock.lock();
        let attempts = u32::from(self.config.write_retries) + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.channel.write(&raw) {
                Ok(()) => {
                    log_message(
                        if attempt == 1 {
                            MessageDirection::Outbound
                        } else {
                            MessageDirection::Retry
                        },
                        message,
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_sent(message.kind());
                    }
                    return Ok(());
                }
                Err(err) => {
                    let retryable = !matches!(err, ChannelError::Closed(_));
                    if retryable && attempt < attempts {
                        tracing::debug!(channel = self.channel.name(), attempt, error = %err, "channel write failed; retrying");
                        continue;
                    }
                    tracing::warn!(channel = self.channel.name(), kind = message.kind(), attempt, error = %err, "channel write failed");
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_write_failure();
                    }
                    return Err(MessagingError::Channel(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    fn adapter(channel: &Arc<InMemoryChannel>, retries: u8) -> ChannelAdapter {
        ChannelAdapter::new(
            channel.clone(),
            Codec::default(),
            ChannelConfig {
                write_retries: retries,
            },
        )
    }

    #[test]
    fn in_memory_channel_records_writes() {
        let channel = InMemoryChannel::new();
        channel
            .write(&RawMessage::from_values(vec![7]))
            .expect("write succeeds");
        assert_eq!(channel.written_len(), 1);
        assert_eq!(channel.pop_written().map(|m| m.values), Some(vec![7]));
        assert!(channel.pop_written().is_none());
    }

    #[test]
    fn adapter_encodes_before_writing() {
        let channel = Arc::new(InMemoryChannel::new());
        adapter(&channel, 0)
            .send(&VmsMessage::Subscribe(Layer::new(8, 3)))
            .expect("send");
        assert_eq!(channel.take_written(), vec![RawMessage::from_values(vec![1, 8, 3])]);
    }

    #[test]
    fn adapter_retries_up_to_configured_attempts() {
        let channel = Arc::new(InMemoryChannel::new());
        channel.fail_next_writes(2);
        adapter(&channel, 2)
            .send(&VmsMessage::SubscriptionRequest)
            .expect("third attempt succeeds");
        assert_eq!(channel.written_len(), 1);

        channel.fail_next_writes(2);
        let err = adapter(&channel, 1)
            .send(&VmsMessage::SubscriptionRequest)
            .unwrap_err();
        assert!(matches!(
            err,
            MessagingError::Channel(ChannelError::WriteFailed { .. })
        ));
    }

    #[test]
    fn closed_channel_is_not_retried() {
        let channel = Arc::new(InMemoryChannel::new());
        channel.close();
        let err = adapter(&channel, 5)
            .send(&VmsMessage::SubscribeAll)
            .unwrap_err();
        assert!(matches!(err, MessagingError::Channel(ChannelError::Closed(_))));
    }

    #[test]
    fn encode_failure_never_reaches_channel() {
        let channel = Arc::new(InMemoryChannel::new());
        let err = adapter(&channel, 0)
            .send(&VmsMessage::Subscribe(Layer::new(u32::MAX, 0)))
            .unwrap_err();
        assert!(matches!(err, MessagingError::Codec(_)));
        assert_eq!(channel.written_len(), 0);
    }

    #[test]
    fn raw_message_json_uses_hex_payload() {
        let raw = RawMessage::new(vec![5, 2, 3], Bytes::from_static(&[0xa, 0xb]));
        let json = serde_json::to_string(&raw).expect("serialize");
        assert_eq!(json, r#"{"values":[5,2,3],"payload":"0a0b"}"#);
        let back: RawMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, raw);
        let bare: RawMessage = serde_json::from_str(r#"{"values":[7]}"#).expect("deserialize");
        assert!(bare.payload.is_empty());
    }
}
